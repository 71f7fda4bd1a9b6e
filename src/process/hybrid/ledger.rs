use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Mortality view of one partition category.
///
/// The per-age arrays are sized to the category's age spread and are
/// overwritten on every execution.
#[derive(Debug, PartialEq, Clone)]
pub struct CategoryLedger {
    pub label: String,
    /// Index of the category in the partition.
    pub category: usize,
    pub min_age: u32,
    /// Natural mortality rate (addressable).
    pub m: f64,
    pub m_selectivity_label: String,
    pub m_selectivity: usize,
    pub age_weight_label: Option<String>,
    pub age_weight: Option<usize>,

    pub m_selectivity_values: Vec<f64>,
    /// Z with natural mortality only.
    pub natural_z: Vec<f64>,
    /// Z with natural and fishing mortality.
    pub z: Vec<f64>,
    pub survivorship: Vec<f64>,
    /// exp(-Z/2) with natural mortality only.
    pub half_m_decay: Vec<f64>,
    /// Weight converting numbers to catch units.
    pub catch_weight: Vec<f64>,
}

impl CategoryLedger {
    pub fn new(
        label: &str,
        category: usize,
        min_age: u32,
        age_spread: usize,
        m: f64,
        m_selectivity_label: &str,
        m_selectivity: usize,
    ) -> Self {
        Self {
            label: label.to_string(),
            category,
            min_age,
            m,
            m_selectivity_label: m_selectivity_label.to_string(),
            m_selectivity,
            age_weight_label: None,
            age_weight: None,
            m_selectivity_values: vec![0.0; age_spread],
            natural_z: vec![0.0; age_spread],
            z: vec![0.0; age_spread],
            survivorship: vec![0.0; age_spread],
            half_m_decay: vec![0.0; age_spread],
            catch_weight: vec![0.0; age_spread],
        }
    }

    pub fn age_spread(&self) -> usize {
        self.z.len()
    }
}

/// One named fishing method.
#[derive(Debug, PartialEq, Clone)]
pub struct FisheryLedger {
    pub label: String,
    pub time_step_label: String,
    pub time_step: usize,
    /// Fraction of the year the fishery's time step covers.
    pub season_length: f64,
    pub penalty_label: Option<String>,
    pub penalty: Option<usize>,

    /// Observed catch by year (addressable).
    pub catches: BTreeMap<u32, f64>,
    /// Catch achieved by the solved F, by year.
    pub actual_catches: BTreeMap<u32, f64>,
    pub f_by_year: BTreeMap<u32, f64>,

    pub vulnerability: f64,
    /// Current estimate of the instantaneous fishing mortality.
    pub f: f64,
}

impl FisheryLedger {
    pub fn catch(&self, year: u32) -> f64 {
        self.catches.get(&year).copied().unwrap_or(0.0)
    }
}

/// Selectivity of one fishery on one category.
#[derive(Debug, PartialEq, Clone)]
pub struct FisheryCategoryLink {
    /// Index into the fishery ledgers.
    pub fishery: usize,
    /// Index into the category ledgers.
    pub category: usize,
    pub selectivity_label: String,
    pub selectivity: usize,
    pub selectivity_values: Vec<f64>,
}

/// What the process does in one time step of the annual cycle.
#[derive(Debug, PartialEq, Clone)]
pub struct TimeStepPlan {
    /// Share of the annual natural mortality applied in this time step.
    pub ratio: f64,
    pub season_length: f64,
    pub fisheries: Vec<usize>,
    pub links: Vec<usize>,
}

impl TimeStepPlan {
    pub fn has_fishery(&self) -> bool {
        !self.fisheries.is_empty()
    }
}

/// All records of a hybrid mortality process.
#[derive(Debug, PartialEq, Clone)]
pub struct Ledgers {
    pub categories: Vec<CategoryLedger>,
    pub fisheries: Vec<FisheryLedger>,
    pub links: Vec<FisheryCategoryLink>,
    /// Years with catches, ascending.
    pub years: Vec<u32>,
    pub plans: Vec<TimeStepPlan>,
}

impl Ledgers {
    pub fn fishery_index(&self, label: &str) -> Option<usize> {
        self.fisheries.iter().position(|fishery| fishery.label == label)
    }

    pub fn category_index(&self, label: &str) -> Option<usize> {
        self.categories.iter().position(|cat| cat.label == label)
    }

    pub fn year_index(&self, year: u32) -> Option<usize> {
        self.years.binary_search(&year).ok()
    }

    pub fn fishery_indices(&self, labels: &[String]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                self.fishery_index(label)
                    .with_context(|| format!("fishery {label} was not found"))
            })
            .collect()
    }

    pub fn category_indices(&self, labels: &[String]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                self.category_index(label)
                    .with_context(|| format!("category {label} was not found"))
            })
            .collect()
    }

    pub fn year_indices(&self, years: &[u32]) -> Result<Vec<usize>> {
        years
            .iter()
            .map(|&year| {
                self.year_index(year)
                    .with_context(|| format!("year {year} has no catches"))
            })
            .collect()
    }

    /// Labels of the categories a fishery is linked to.
    pub fn fishery_categories(&self, fishery: usize) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(move |link| link.fishery == fishery)
            .map(|link| self.categories[link.category].label.as_str())
    }

    /// Observed catch summed over the fisheries of each time step, by year index.
    pub fn observed_totals(&self) -> Vec<Vec<f64>> {
        self.years
            .iter()
            .map(|&year| {
                self.plans
                    .iter()
                    .map(|plan| {
                        plan.fisheries
                            .iter()
                            .map(|&i_fish| self.fisheries[i_fish].catch(year))
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }
}

/// Catch at age in numbers by active year, fishery, category and model age.
#[derive(Debug, PartialEq, Clone)]
pub struct RemovalsCache {
    values: Vec<f64>,
    n_fisheries: usize,
    n_categories: usize,
    n_ages: usize,
}

impl RemovalsCache {
    pub fn new(n_years: usize, n_fisheries: usize, n_categories: usize, n_ages: usize) -> Self {
        Self {
            values: vec![0.0; n_years * n_fisheries * n_categories * n_ages],
            n_fisheries,
            n_categories,
            n_ages,
        }
    }

    fn offset(&self, year_idx: usize, fishery_idx: usize, category_idx: usize) -> usize {
        assert!(fishery_idx < self.n_fisheries && category_idx < self.n_categories);
        ((year_idx * self.n_fisheries + fishery_idx) * self.n_categories + category_idx) * self.n_ages
    }

    pub fn row(&self, year_idx: usize, fishery_idx: usize, category_idx: usize) -> &[f64] {
        let start = self.offset(year_idx, fishery_idx, category_idx);
        &self.values[start..start + self.n_ages]
    }

    pub fn row_mut(&mut self, year_idx: usize, fishery_idx: usize, category_idx: usize) -> &mut [f64] {
        let start = self.offset(year_idx, fishery_idx, category_idx);
        &mut self.values[start..start + self.n_ages]
    }
}
