use crate::config::{Config, broadcast};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Numbers-at-age of one population sub-group.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Category {
    pub label: String,
    pub min_age: u32,
    pub max_age: u32,

    /// Numbers at age, indexed from `min_age`.
    pub data: Vec<f64>,

    /// Mean individual weight at age, indexed from `min_age`.
    pub mean_weight: Vec<f64>,
}

impl Category {
    pub fn age_spread(&self) -> usize {
        self.data.len()
    }

    /// Total weight of the category, each age scaled by `scale`.
    pub fn biomass<F: Fn(u32) -> f64>(&self, scale: F) -> f64 {
        self.data
            .iter()
            .zip(&self.mean_weight)
            .enumerate()
            .map(|(i_age, (n, w))| n * w * scale(self.min_age + i_age as u32))
            .sum()
    }
}

/// The shared population state: every category of the model.
///
/// Processes receive it by exclusive reference when they execute.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub min_age: u32,
    pub max_age: u32,
    pub plus_group: bool,
    pub categories: Vec<Category>,
}

impl Partition {
    /// Create an empty (all zero) partition from the model configuration.
    pub fn new(cfg: &Config) -> Self {
        let categories = cfg
            .categories
            .iter()
            .map(|cat| {
                let min_age = cat.min_age.unwrap_or(cfg.model.min_age);
                let max_age = cat.max_age.unwrap_or(cfg.model.max_age);
                let spread = (max_age - min_age + 1) as usize;
                Category {
                    label: cat.label.clone(),
                    min_age,
                    max_age,
                    data: vec![0.0; spread],
                    mean_weight: broadcast(&cat.mean_weight, spread),
                }
            })
            .collect();

        Self {
            min_age: cfg.model.min_age,
            max_age: cfg.model.max_age,
            plus_group: cfg.model.plus_group,
            categories,
        }
    }

    pub fn age_spread(&self) -> usize {
        (self.max_age - self.min_age + 1) as usize
    }

    pub fn category_index(&self, label: &str) -> Option<usize> {
        self.categories.iter().position(|cat| cat.label == label)
    }

    /// Resolve a list of category labels to partition indices.
    pub fn category_indices(&self, labels: &[String]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                self.category_index(label)
                    .with_context(|| format!("category {label} was not found"))
            })
            .collect()
    }

    pub fn total(&self) -> f64 {
        self.categories.iter().flat_map(|cat| &cat.data).sum()
    }
}
