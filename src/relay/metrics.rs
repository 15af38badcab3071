//! Metrics for relayed generation streams
//!
//! # Metrics
//!
//! - `relay_streams_total`: Counter of relayed streams, labeled by provider
//! - `relay_fragments_total`: Counter of fragments forwarded to consumers
//! - `relay_stream_errors_total`: Counter of failed streams by error kind
//! - `relay_tokens_per_second`: Histogram of final throughput per stream
//! - `relay_stream_duration_seconds`: Histogram of stream duration
//! - `relay_active_streams`: Gauge of streams currently in flight

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Metrics tracker for one relayed stream
///
/// Recording is one-shot: the first of `record_completion` or `record_error`
/// wins. Dropping an unrecorded tracker (the consumer abandoned the stream)
/// still releases the active gauge.
#[derive(Debug)]
pub struct RelayMetrics {
    provider: &'static str,
    recorded: AtomicBool,
}

impl RelayMetrics {
    /// Start tracking a stream for the named provider
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::relay::metrics::RelayMetrics;
    ///
    /// let metrics = RelayMetrics::new("gemini");
    /// metrics.record_fragment();
    /// metrics.record_completion(12, std::time::Duration::from_secs(2));
    /// ```
    pub fn new(provider: &'static str) -> Self {
        increment_counter!("relay_streams_total", "provider" => provider);
        increment_gauge!("relay_active_streams", 1.0, "provider" => provider);

        Self {
            provider,
            recorded: AtomicBool::new(false),
        }
    }

    /// Count one forwarded fragment
    pub fn record_fragment(&self) {
        increment_counter!("relay_fragments_total", "provider" => self.provider);
    }

    /// Record a stream that ended normally
    pub fn record_completion(&self, total_tokens: u64, elapsed: Duration) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }

        let seconds = elapsed.as_secs_f64();
        histogram!(
            "relay_stream_duration_seconds",
            seconds,
            "provider" => self.provider
        );
        if seconds > 0.0 {
            histogram!(
                "relay_tokens_per_second",
                total_tokens as f64 / seconds,
                "provider" => self.provider
            );
        }

        decrement_gauge!("relay_active_streams", 1.0, "provider" => self.provider);
    }

    /// Record a stream that failed
    ///
    /// # Arguments
    ///
    /// * `kind` - Short error label ("unavailable", "upstream")
    pub fn record_error(&self, kind: &'static str) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }

        increment_counter!(
            "relay_stream_errors_total",
            "provider" => self.provider,
            "kind" => kind
        );
        decrement_gauge!("relay_active_streams", 1.0, "provider" => self.provider);
    }

    fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }
}

impl Drop for RelayMetrics {
    fn drop(&mut self) {
        if !self.is_recorded() {
            decrement_gauge!("relay_active_streams", 1.0, "provider" => self.provider);
        }
    }
}

/// Install the Prometheus exporter when built with the `prometheus` feature
///
/// Without the feature this is a no-op.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let _ = PrometheusBuilder::new().install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
