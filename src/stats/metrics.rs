//! Metrics exporter: snapshots of named counters/gauges in Prometheus and
//! JSON text form, for embedding GC metrics into a host process's own
//! monitoring endpoint.

use indexmap::IndexMap;
use std::sync::Mutex;

use crate::error::{GcError, Result};

pub struct GcMetrics {
    metrics: Mutex<IndexMap<String, MetricValue>>,
}

impl GcMetrics {
    pub fn new() -> Self {
        Self { metrics: Mutex::new(IndexMap::new()) }
    }

    pub fn set(&self, name: impl Into<String>, value: MetricValue) -> Result<()> {
        self.metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {e}")))?
            .insert(name.into(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<MetricValue>> {
        Ok(self
            .metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {e}")))?
            .get(name)
            .copied())
    }

    pub fn to_prometheus(&self) -> Result<String> {
        let metrics = self
            .metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {e}")))?;
        let mut output = String::new();
        for (name, value) in metrics.iter() {
            output.push_str(&format!("{name} {}\n", value.as_f64()));
        }
        Ok(output)
    }

    pub fn to_json(&self) -> Result<String> {
        let metrics = self
            .metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {e}")))?;
        let pairs: Vec<String> = metrics.iter().map(|(name, value)| format!("\"{name}\": {}", value.as_f64())).collect();
        Ok(format!("{{{}}}", pairs.join(",")))
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(u64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
            MetricValue::Histogram(v) => *v as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_export() {
        let metrics = GcMetrics::new();
        metrics.set("gc_cycles_total", MetricValue::Counter(3)).unwrap();
        assert_eq!(metrics.to_prometheus().unwrap().trim(), "gc_cycles_total 3");
    }
}
