//! Prometheus metrics
//!
//! Owned registry rather than process globals so tests can build isolated
//! instances.

use crds::EvaPhase;
use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder, opts};

/// Controller metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    phase_decisions: IntCounterVec,
    jobs_created: IntCounter,
}

impl Metrics {
    /// Create and register all controller metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            opts!("eva_reconciliations_total", "Eva reconcile attempts by outcome"),
            &["result"],
        )?;
        let phase_decisions = IntCounterVec::new(
            opts!("eva_phase_decisions_total", "Phases decided for Evas"),
            &["phase"],
        )?;
        let jobs_created = IntCounter::with_opts(opts!("eva_jobs_created_total", "Jobs created for Evas"))?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(phase_decisions.clone()))?;
        registry.register(Box::new(jobs_created.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            phase_decisions,
            jobs_created,
        })
    }

    pub fn record_reconcile(&self, result: &str) {
        self.reconciliations.with_label_values(&[result]).inc();
    }

    pub fn record_phase(&self, phase: EvaPhase) {
        let label = match phase {
            EvaPhase::Unset => "unset",
            other => other.as_str(),
        };
        self.phase_decisions.with_label_values(&[label]).inc();
    }

    pub fn record_job_created(&self) {
        self.jobs_created.inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }
}
