/*!
Observability infrastructure for save managers.

- Structured logging through `tracing`, installed with [`init_observability`]
- Prometheus metrics for saves and loads (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{KeepsakeError, Result};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "keepsake_core=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<KeepsakeMetrics> = OnceLock::new();

/// Metrics for save manager operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct KeepsakeMetrics {
    pub saves_total: Counter,
    pub loads_total: Counter,
    /// Failed operations labelled by operation and status
    pub failures_total: CounterVec,
    pub save_duration_seconds: Histogram,
    pub load_duration_seconds: Histogram,
    pub body_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> KeepsakeError {
    KeepsakeError::storage(format!("Failed to set up metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl KeepsakeMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let saves_total = Counter::new("keepsake_saves_total", "Total save operations")
            .map_err(|e| metric_error("saves_total", e))?;
        let loads_total = Counter::new("keepsake_loads_total", "Total load operations")
            .map_err(|e| metric_error("loads_total", e))?;
        let failures_total = CounterVec::new(
            Opts::new("keepsake_failures_total", "Failed save and load operations"),
            &["operation", "status"],
        )
        .map_err(|e| metric_error("failures_total", e))?;
        let save_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "keepsake_save_duration_seconds",
            "Duration of save operations in seconds",
        ))
        .map_err(|e| metric_error("save_duration_seconds", e))?;
        let load_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "keepsake_load_duration_seconds",
            "Duration of load operations in seconds",
        ))
        .map_err(|e| metric_error("load_duration_seconds", e))?;
        // 1 KiB up to 256 MiB
        let size_buckets = prometheus::exponential_buckets(1024.0, 4.0, 10)
            .map_err(|e| metric_error("body_size_bytes", e))?;
        let body_size_bytes = Histogram::with_opts(
            HistogramOpts::new("keepsake_body_size_bytes", "Size of stored save bodies")
                .buckets(size_buckets),
        )
        .map_err(|e| metric_error("body_size_bytes", e))?;

        registry
            .register(Box::new(saves_total.clone()))
            .map_err(|e| metric_error("saves_total", e))?;
        registry
            .register(Box::new(loads_total.clone()))
            .map_err(|e| metric_error("loads_total", e))?;
        registry
            .register(Box::new(failures_total.clone()))
            .map_err(|e| metric_error("failures_total", e))?;
        registry
            .register(Box::new(save_duration_seconds.clone()))
            .map_err(|e| metric_error("save_duration_seconds", e))?;
        registry
            .register(Box::new(load_duration_seconds.clone()))
            .map_err(|e| metric_error("load_duration_seconds", e))?;
        registry
            .register(Box::new(body_size_bytes.clone()))
            .map_err(|e| metric_error("body_size_bytes", e))?;

        Ok(Self {
            saves_total,
            loads_total,
            failures_total,
            save_duration_seconds,
            load_duration_seconds,
            body_size_bytes,
            registry,
        })
    }

    /// Global metrics instance, created on first use.
    ///
    /// Returns `None` if the metrics could not be registered.
    pub fn global() -> Option<&'static KeepsakeMetrics> {
        if let Some(metrics) = METRICS.get() {
            return Some(metrics);
        }
        match Self::new() {
            Ok(metrics) => Some(METRICS.get_or_init(|| metrics)),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics unavailable");
                None
            }
        }
    }

    pub fn record_save(&self, result: &crate::SaveResult) {
        self.saves_total.inc();
        self.save_duration_seconds
            .observe(result.duration_ms as f64 / 1000.0);
        if result.status.is_ok() {
            self.body_size_bytes.observe(result.bytes_written as f64);
        } else {
            self.failures_total
                .with_label_values(&["save", &format!("{:?}", result.status)])
                .inc();
        }
    }

    pub fn record_load(&self, result: &crate::LoadResult) {
        self.loads_total.inc();
        self.load_duration_seconds
            .observe(result.duration_ms as f64 / 1000.0);
        if !result.status.is_ok() {
            self.failures_total
                .with_label_values(&["load", &format!("{:?}", result.status)])
                .inc();
        }
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| KeepsakeError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| KeepsakeError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`]. With `json` set
/// events are written as JSON lines, otherwise as human-readable text.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    KeepsakeMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .map_err(|e| KeepsakeError::validation(format!("Invalid log filter: {e}")))?;

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        KeepsakeError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Keepsake observability initialized");
    Ok(())
}

/// Initialize observability with text output
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
