use crate::config::{Config, PenaltyConfig, PenaltyKind};
use serde::{Deserialize, Serialize};

/// One triggered penalty value.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PenaltyScore {
    pub penalty: String,
    pub source: String,
    pub value: f64,
}

/// Soft constraint comparing two values, e.g. observed and achieved catch.
#[derive(Debug, PartialEq, Clone)]
pub struct ProcessPenalty {
    pub label: String,
    multiplier: f64,
    log_scale: bool,
}

impl ProcessPenalty {
    pub fn new(cfg: &PenaltyConfig) -> Self {
        match cfg.kind {
            PenaltyKind::Process => Self {
                label: cfg.label.clone(),
                multiplier: cfg.multiplier,
                log_scale: cfg.log_scale,
            },
        }
    }

    fn value(&self, expected: f64, actual: f64) -> f64 {
        let diff = if self.log_scale {
            // Zero catches are floored so the log stays finite.
            let floor = f64::MIN_POSITIVE;
            expected.max(floor).ln() - actual.max(floor).ln()
        } else {
            expected - actual
        };
        diff * diff * self.multiplier
    }
}

/// Penalties of a model and the scores triggered during the current run.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Penalties {
    items: Vec<ProcessPenalty>,
    scores: Vec<PenaltyScore>,
}

impl Penalties {
    pub fn new(cfg: &Config) -> Self {
        Self {
            items: cfg.penalties.iter().map(ProcessPenalty::new).collect(),
            scores: Vec::new(),
        }
    }

    pub fn index(&self, label: &str) -> Option<usize> {
        self.items.iter().position(|pen| pen.label == label)
    }

    /// Record a penalty comparing `expected` with `actual`.
    pub fn trigger(&mut self, idx: usize, source: &str, expected: f64, actual: f64) {
        let pen = &self.items[idx];
        let value = pen.value(expected, actual);
        log::trace!("penalty {} from {source}: {value}", pen.label);
        self.scores.push(PenaltyScore {
            penalty: pen.label.clone(),
            source: source.to_string(),
            value,
        });
    }

    pub fn scores(&self) -> &[PenaltyScore] {
        &self.scores
    }

    pub fn total(&self) -> f64 {
        self.scores.iter().map(|score| score.value).sum()
    }

    pub fn reset(&mut self) {
        self.scores.clear();
    }
}
