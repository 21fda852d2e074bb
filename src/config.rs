//! Daemon settings resolved from flags and environment variables.

use std::time::Duration;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub jupyter_host: String,
    pub jupyter_token: String,
    pub access_token: String,
    pub log_level: String,
    pub grace_shutdown: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 44772,
            jupyter_host: String::new(),
            jupyter_token: String::new(),
            access_token: String::new(),
            log_level: "info".to_string(),
            grace_shutdown: Duration::from_secs(1),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        if !self.jupyter_host.is_empty()
            && !self.jupyter_host.starts_with("http://")
            && !self.jupyter_host.starts_with("https://")
        {
            return Err(
                "Invalid JUPYTER_HOST format: must start with http:// or https://".to_string(),
            );
        }
        Ok(())
    }
}

/// Parse durations of the form `300ms`, `1s`, `2m`, `1h`; a bare number is
/// seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }

    let (value, unit) = match raw.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration value: {raw}"))?;

    let duration = match unit {
        "ms" => Duration::from_secs_f64(value / 1000.0),
        "s" => Duration::from_secs_f64(value),
        "m" => Duration::from_secs_f64(value * 60.0),
        "h" => Duration::from_secs_f64(value * 3600.0),
        other => return Err(format!("unknown duration unit: {other}")),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("oops").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn jupyter_host_must_be_http() {
        let mut settings = Settings {
            jupyter_host: "ftp://example".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        settings.jupyter_host = "http://127.0.0.1:8888".to_string();
        assert!(settings.validate().is_ok());

        settings.jupyter_host = String::new();
        assert!(settings.validate().is_ok());
    }
}
