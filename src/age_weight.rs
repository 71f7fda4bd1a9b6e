use crate::config::{Config, broadcast};

/// Externally supplied weight-at-age, used instead of the category mean
/// weight when converting numbers to catch biomass.
#[derive(Debug, PartialEq, Clone)]
pub struct AgeWeight {
    pub label: String,
    min_age: u32,
    values: Vec<f64>,
}

impl AgeWeight {
    pub fn mean_weight(&self, age: u32) -> f64 {
        self.values[(age - self.min_age) as usize]
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct AgeWeights {
    items: Vec<AgeWeight>,
}

impl AgeWeights {
    pub fn new(cfg: &Config) -> Self {
        let items = cfg
            .age_weights
            .iter()
            .map(|aw| AgeWeight {
                label: aw.label.clone(),
                min_age: cfg.model.min_age,
                values: broadcast(&aw.values, cfg.model.age_spread()),
            })
            .collect();
        Self { items }
    }

    pub fn index(&self, label: &str) -> Option<usize> {
        self.items.iter().position(|aw| aw.label == label)
    }

    pub fn get(&self, idx: usize) -> &AgeWeight {
        &self.items[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::base_toml;

    #[test]
    fn values_are_broadcast_over_model_ages() {
        let toml = base_toml()
            + r#"
[[age_weights]]
label = "flat"
values = [2.5]

[[age_weights]]
label = "ramp"
values = [1.0, 2.0, 3.0, 4.0, 5.0]
"#;
        let cfg = Config::from_toml(&toml).unwrap();
        let aws = AgeWeights::new(&cfg);
        let flat = aws.get(aws.index("flat").unwrap());
        assert_eq!(flat.mean_weight(5), 2.5);
        let ramp = aws.get(aws.index("ramp").unwrap());
        assert_eq!(ramp.mean_weight(1), 1.0);
        assert_eq!(ramp.mean_weight(4), 4.0);
        assert!(aws.index("none").is_none());
    }
}
