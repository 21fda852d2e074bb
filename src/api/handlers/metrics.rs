//! Host CPU and memory snapshots.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use sysinfo::System;

use crate::api::error::ApiError;

#[derive(Debug, Default, Clone, Serialize)]
pub struct Metrics {
    pub cpu_count: f64,
    pub cpu_used_pct: f64,
    pub mem_total_mib: f64,
    pub mem_used_mib: f64,
    pub timestamp: i64,
}

async fn read_metrics() -> Metrics {
    tokio::task::spawn_blocking(|| {
        let mut sys = System::new();
        // CPU usage needs two samples a minimum interval apart
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Metrics {
            cpu_count: sys.cpus().len() as f64,
            cpu_used_pct: sys.global_cpu_usage() as f64,
            mem_total_mib: sys.total_memory() as f64 / 1024.0 / 1024.0,
            mem_used_mib: sys.used_memory() as f64 / 1024.0 / 1024.0,
            timestamp: Utc::now().timestamp_millis(),
        }
    })
    .await
    .unwrap_or_default()
}

/// `GET /metrics`
pub async fn get_metrics() -> Result<Json<Metrics>, ApiError> {
    Ok(Json(read_metrics().await))
}

/// `GET /metrics/watch`: one newline-framed JSON snapshot per second until
/// the client disconnects.
pub async fn watch_metrics() -> Result<Response, ApiError> {
    let stream = futures::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let metrics = read_metrics().await;
        let mut payload = serde_json::to_vec(&metrics).unwrap_or_default();
        payload.push(b'\n');
        Some((Ok::<Bytes, Infallible>(Bytes::from(payload)), ()))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::runtime(format!("error building stream response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_report_plausible_host_numbers() {
        let metrics = read_metrics().await;
        assert!(metrics.cpu_count >= 1.0);
        assert!(metrics.mem_total_mib > 0.0);
        assert!(metrics.mem_used_mib <= metrics.mem_total_mib);
        assert!(metrics.timestamp > 0);
    }
}
