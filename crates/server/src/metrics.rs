//! Prometheus metrics
//!
//! Installs the global recorder and serves `/metrics`. Pipeline stages
//! record their own histograms at point of use; this module only names
//! and describes them.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the recorder. Safe to call once at startup; later calls are
/// no-ops (tests share the process recorder).
pub fn init_metrics() {
    let mut handle = HANDLE.lock();
    if handle.is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(recorder) => {
            describe();
            *handle = Some(recorder);
        }
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed");
        }
    }
}

fn describe() {
    metrics::describe_histogram!("llm_ms", "Extraction latency per turn");
    metrics::describe_histogram!("tts_generation_ms", "Synthesis time to first byte");
    metrics::describe_histogram!("tts_streaming_ms", "Synthesis streaming duration");
    metrics::describe_histogram!("turn_total_ms", "End of utterance to last frame queued");
    metrics::describe_counter!("asr_frames_dropped_total", "Audio frames dropped to backpressure");
    metrics::describe_counter!("event_sink_dropped_total", "Turn records dropped to backpressure");
    metrics::describe_counter!("calls_total", "Media streams accepted");
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match HANDLE.lock().as_ref() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        metrics::counter!("calls_total").increment(1);
        // Render succeeds whether or not this process won the recorder.
        let _ = metrics_handler().await;
    }
}
