//! Prometheus metrics for catalog activity
//!
//! - Storage instance opens, by kind (table/index) and outcome
//! - Config record rewrites, by outcome
//! - Current table and index counts

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static::lazy_static! {
    /// Registry holding every catalog metric
    pub static ref METRICS_REGISTRY: Registry = {
        let registry = Registry::new();
        let collectors: [Box<dyn prometheus::core::Collector>; 4] = [
            Box::new(STORAGE_OPENS.clone()),
            Box::new(CONFIG_WRITES.clone()),
            Box::new(TABLES.clone()),
            Box::new(INDEXES.clone()),
        ];
        for collector in collectors {
            if let Err(e) = registry.register(collector) {
                error!("Failed to register metric: {}", e);
            }
        }
        registry
    };

    pub static ref STORAGE_OPENS: IntCounterVec = IntCounterVec::new(
        Opts::new("docstore_storage_opens_total", "Storage instances opened"),
        &["kind", "status"]
    ).expect("valid metric definition");

    pub static ref CONFIG_WRITES: IntCounterVec = IntCounterVec::new(
        Opts::new("docstore_config_writes_total", "Config record rewrites"),
        &["status"]
    ).expect("valid metric definition");

    pub static ref TABLES: IntGauge = IntGauge::new(
        "docstore_tables",
        "Tables in open databases"
    ).expect("valid metric definition");

    pub static ref INDEXES: IntGauge = IntGauge::new(
        "docstore_indexes",
        "Indexes in open databases"
    ).expect("valid metric definition");
}

fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

pub(crate) fn record_storage_open(kind: &str, ok: bool) {
    STORAGE_OPENS.with_label_values(&[kind, status(ok)]).inc();
}

pub(crate) fn record_config_write(ok: bool) {
    CONFIG_WRITES.with_label_values(&[status(ok)]).inc();
}

pub(crate) fn adjust_catalog(tables: i64, indexes: i64) {
    TABLES.add(tables);
    INDEXES.add(indexes);
}

/// Render all catalog metrics in the Prometheus text format.
pub fn export() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_catalog_metrics() {
        record_storage_open("table", true);
        record_config_write(true);

        let text = export();
        assert!(text.contains("docstore_storage_opens_total"));
        assert!(text.contains("docstore_config_writes_total"));
        assert!(text.contains("docstore_tables"));
    }
}
