use crate::config::{Config, Curve, SelectivityConfig};
use anyhow::{Result, bail};

/// Age-based selectivity curve.
#[derive(Debug, PartialEq, Clone)]
pub struct Selectivity {
    pub label: String,
    curve: Curve,
    min_age: u32,
}

impl Selectivity {
    pub fn new(cfg: &SelectivityConfig, min_age: u32) -> Self {
        Self {
            label: cfg.label.clone(),
            curve: cfg.curve.clone(),
            min_age,
        }
    }

    /// Relative vulnerability at `age`.
    pub fn age_result(&self, age: u32) -> f64 {
        match &self.curve {
            Curve::Constant { c } => *c,
            Curve::Logistic { a50, ato95, alpha } => {
                let threshold = (a50 - age as f64) / ato95;
                if threshold > 5.0 {
                    0.0
                } else if threshold < -5.0 {
                    *alpha
                } else {
                    alpha / (1.0 + 19.0_f64.powf(threshold))
                }
            }
            Curve::AllValues { values } => values[(age - self.min_age) as usize],
        }
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match (&mut self.curve, name) {
            (Curve::Constant { c }, "c") => *c = value,
            (Curve::Logistic { a50, .. }, "a50") => *a50 = value,
            (Curve::Logistic { ato95, .. }, "ato95") => {
                if value == 0.0 {
                    bail!("selectivity {} cannot have ato95 = 0", self.label);
                }
                *ato95 = value;
            }
            (Curve::Logistic { alpha, .. }, "alpha") => *alpha = value,
            _ => bail!("selectivity {} has no addressable parameter {name}", self.label),
        }
        Ok(())
    }
}

/// All selectivities of a model, looked up by label at build time and by
/// index afterwards.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Selectivities {
    items: Vec<Selectivity>,
}

impl Selectivities {
    pub fn new(cfg: &Config) -> Self {
        let items = cfg
            .selectivities
            .iter()
            .map(|sel| Selectivity::new(sel, cfg.model.min_age))
            .collect();
        Self { items }
    }

    pub fn index(&self, label: &str) -> Option<usize> {
        self.items.iter().position(|sel| sel.label == label)
    }

    pub fn get(&self, idx: usize) -> &Selectivity {
        &self.items[idx]
    }

    pub fn set_parameter(&mut self, label: &str, name: &str, value: f64) -> Result<()> {
        let Some(idx) = self.index(label) else {
            bail!("selectivity {label} was not found");
        };
        self.items[idx].set_parameter(name, value)
    }
}
