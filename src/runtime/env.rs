//! Supplementary environment variables for spawned commands.
//!
//! The file named by `EXECD_ENVS` is re-read at every command start so edits
//! take effect without a daemon restart.

use log::warn;

/// Environment variable naming the extra-env file.
pub const EXTRA_ENV_FILE_VAR: &str = "EXECD_ENVS";

/// Read `KEY=VALUE` pairs from the `EXECD_ENVS` file, if configured.
///
/// Empty lines and lines starting with `#` are ignored; malformed lines are
/// logged and skipped. Values are expanded against the current process
/// environment before being returned.
pub fn load_extra_env() -> Vec<(String, String)> {
    let path = match std::env::var(EXTRA_ENV_FILE_VAR) {
        Ok(path) if !path.is_empty() => path,
        _ => return Vec::new(),
    };

    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(err) => {
            warn!("{EXTRA_ENV_FILE_VAR}: failed to read file {path}: {err}");
            return Vec::new();
        }
    };

    let mut envs = Vec::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => envs.push((key.to_string(), expand_env(value))),
            None => warn!("{EXTRA_ENV_FILE_VAR}: skip malformed line: {line}"),
        }
    }

    envs
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let mut name = String::new();
        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
            }
            Some((_, c)) if c.is_ascii_alphanumeric() || *c == '_' => {
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            _ => {
                out.push('$');
                continue;
            }
        }

        if let Ok(value) = std::env::var(&name) {
            out.push_str(&value);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn expand_env_substitutes_known_variables() {
        std::env::set_var("EXECD_TEST_EXPAND", "value");
        assert_eq!(expand_env("a-$EXECD_TEST_EXPAND-b"), "a-value-b");
        assert_eq!(expand_env("a-${EXECD_TEST_EXPAND}-b"), "a-value-b");
        assert_eq!(expand_env("$EXECD_TEST_UNSET_12345"), "");
        assert_eq!(expand_env("plain"), "plain");
        assert_eq!(expand_env("trailing $"), "trailing $");
    }

    // one test owns the EXECD_ENVS variable to keep parallel runs quiet
    #[test]
    fn load_extra_env_follows_the_configured_file() {
        std::env::remove_var(EXTRA_ENV_FILE_VAR);
        assert!(load_extra_env().is_empty());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "FOO=bar").unwrap();
        writeln!(file, "malformed-line").unwrap();
        writeln!(file, "PATHY=$EXECD_TEST_BASE/bin").unwrap();

        std::env::set_var("EXECD_TEST_BASE", "/opt");
        std::env::set_var(EXTRA_ENV_FILE_VAR, file.path());

        let envs = load_extra_env();
        std::env::remove_var(EXTRA_ENV_FILE_VAR);

        assert_eq!(envs.len(), 2);
        assert!(envs.contains(&("FOO".to_string(), "bar".to_string())));
        assert!(envs.contains(&("PATHY".to_string(), "/opt/bin".to_string())));
    }
}
