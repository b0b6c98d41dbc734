// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine metrics
//!
//! Counters and a latency histogram kept in an engine-owned prometheus
//! registry, exported in the text exposition format.

use annforge_core::{AnnError, ErrorCategory};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::fmt;
use std::time::Duration;

/// Outcome label of a finished operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    operations: IntCounterVec,
    errors: IntCounterVec,
    vectors_indexed: IntCounter,
    duration: HistogramVec,
    loaded_indexes: IntGauge,
}

impl fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("vectors_indexed", &self.vectors_indexed.get())
            .field("loaded_indexes", &self.loaded_indexes.get())
            .finish_non_exhaustive()
    }
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("annforge".to_string()), None)?;

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Engine operations by name and outcome"),
            &["operation", "outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Failed operations by error category"),
            &["category"],
        )?;
        let vectors_indexed =
            IntCounter::new("vectors_indexed_total", "Vectors inserted into built indexes")?;
        let duration = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Wall time of engine operations")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
            &["operation"],
        )?;
        let loaded_indexes = IntGauge::new("loaded_indexes", "Indexes currently loaded")?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(vectors_indexed.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(loaded_indexes.clone()))?;

        Ok(Self {
            registry,
            operations,
            errors,
            vectors_indexed,
            duration,
            loaded_indexes,
        })
    }

    pub fn record(&self, operation: &str, elapsed: Duration, error: Option<&AnnError>) {
        let outcome = if error.is_some() {
            Outcome::Failure
        } else {
            Outcome::Success
        };
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
        if let Some(error) = error {
            self.record_error(error.category());
        }
    }

    pub fn record_error(&self, category: ErrorCategory) {
        self.errors.with_label_values(&[category.as_str()]).inc();
    }

    pub fn add_vectors(&self, count: usize) {
        self.vectors_indexed.inc_by(count as u64);
    }

    pub fn set_loaded(&self, loaded: usize) {
        self.loaded_indexes.set(loaded as i64);
    }

    pub fn operation_count(&self, operation: &str, outcome: Outcome) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .get()
    }

    pub fn vectors_indexed(&self) -> u64 {
        self.vectors_indexed.get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_success_and_failure() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record("build_index", Duration::from_millis(3), None);
        metrics.record(
            "build_index",
            Duration::from_millis(1),
            Some(&AnnError::EmptyInput),
        );
        metrics.add_vectors(100);

        assert_eq!(metrics.operation_count("build_index", Outcome::Success), 1);
        assert_eq!(metrics.operation_count("build_index", Outcome::Failure), 1);
        assert_eq!(metrics.vectors_indexed(), 100);

        let text = metrics.export();
        assert!(text.contains("annforge_operations_total"));
        assert!(text.contains("category=\"validation\""));
    }

    #[test]
    fn test_independent_registries() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.add_vectors(5);
        assert_eq!(b.vectors_indexed(), 0);
    }
}
