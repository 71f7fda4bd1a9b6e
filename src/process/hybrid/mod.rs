//! Hybrid mortality: natural mortality and the catches of any number of
//! fisheries, solved together through the Baranov catch equation.
//!
//! Each fishery has an observed catch series. In every year with catches the
//! process iterates on the fishing mortality of the fisheries of the current
//! time step until the implied catch matches the observed one, then removes
//! natural and fishing deaths from the partition in a single exponential
//! decay. Logistic joiners keep the solved rates below `max_f`.

mod build;
mod ledger;
mod solver;

use crate::config::{HybridConfig, SolverConstants};
use crate::partition::Partition;
use crate::process::{BuildContext, BuildError, Process, Removals, StepContext};
use crate::report::{FisheryReport, ProcessReport};
use anyhow::{Context, Result, bail};
use ledger::{Ledgers, RemovalsCache};
use std::collections::BTreeMap;

pub struct MortalityHybrid {
    label: String,
    /// Catches are biomass rather than numbers.
    biomass: bool,
    max_f: f64,
    f_iterations: usize,
    constants: SolverConstants,
    ledgers: Ledgers,
    /// Observed catch of every time step, by active year index.
    observed_totals: Vec<Vec<f64>>,
    removals: RemovalsCache,
    selectivity_labels: Vec<String>,
}

impl MortalityHybrid {
    pub fn new(label: &str, cfg: &HybridConfig, ctx: &BuildContext) -> Result<Self, BuildError> {
        let ledgers = build::build_ledgers(cfg, ctx)?;
        let removals = RemovalsCache::new(
            ledgers.years.len(),
            ledgers.fisheries.len(),
            ledgers.categories.len(),
            ctx.partition.age_spread(),
        );

        let mut selectivity_labels: Vec<String> = ledgers
            .categories
            .iter()
            .map(|cat| cat.m_selectivity_label.clone())
            .chain(ledgers.links.iter().map(|link| link.selectivity_label.clone()))
            .collect();
        selectivity_labels.sort();
        selectivity_labels.dedup();

        log::debug!(
            "process {label}: {} fisheries, {} categories, {} years with catches",
            ledgers.fisheries.len(),
            ledgers.categories.len(),
            ledgers.years.len()
        );

        Ok(Self {
            label: label.to_string(),
            biomass: cfg.biomass,
            max_f: cfg.max_f,
            f_iterations: cfg.f_iterations,
            constants: cfg.constants,
            observed_totals: ledgers.observed_totals(),
            ledgers,
            removals,
            selectivity_labels,
        })
    }

    fn set_catch(&mut self, fishery: &str, year: u32, value: f64) -> Result<()> {
        if value < 0.0 {
            bail!("catch of fishery {fishery} in {year} cannot be negative");
        }
        if self.ledgers.year_index(year).is_none() {
            bail!("process {} has no catches in {year}", self.label);
        }
        let i_fish = self
            .ledgers
            .fishery_index(fishery)
            .with_context(|| format!("process {} has no fishery {fishery}", self.label))?;
        self.ledgers.fisheries[i_fish].catches.insert(year, value);
        Ok(())
    }
}

impl Process for MortalityHybrid {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut StepContext, partition: &mut Partition) {
        self.solve(ctx, partition);
    }

    fn rebuild_cache(&mut self) {
        self.observed_totals = self.ledgers.observed_totals();
    }

    fn set_parameter(&mut self, name: &str, key: Option<&str>, value: f64) -> Result<()> {
        match (name, key) {
            ("m", Some(category)) => {
                let i_cat = self
                    .ledgers
                    .category_index(category)
                    .with_context(|| format!("process {} has no category {category}", self.label))?;
                self.ledgers.categories[i_cat].m = value;
            }
            ("max_f", None) => self.max_f = value,
            ("catches", Some(key)) => {
                let (fishery, year) = key
                    .split_once(':')
                    .with_context(|| format!("catch key {key:?} must be <fishery>:<year>"))?;
                let year = year
                    .trim()
                    .parse()
                    .with_context(|| format!("catch key {key:?} has an invalid year"))?;
                self.set_catch(fishery.trim(), year, value)?;
            }
            _ => {
                let key = key.map(|key| format!("{{{key}}}")).unwrap_or_default();
                bail!("process {} has no addressable parameter {name}{key}", self.label);
            }
        }
        Ok(())
    }

    fn set_parameter_in_year(&mut self, name: &str, key: Option<&str>, year: u32, value: f64) -> Result<()> {
        match (name, key) {
            ("catches", Some(fishery)) if !fishery.contains(':') => self.set_catch(fishery, year, value),
            _ => self.set_parameter(name, key, value),
        }
    }

    fn selectivity_labels(&self) -> Vec<String> {
        self.selectivity_labels.clone()
    }

    fn removals(&self) -> Option<&dyn Removals> {
        Some(self)
    }

    fn report(&self) -> Option<ProcessReport> {
        let years = &self.ledgers.years;
        let series = |map: &BTreeMap<u32, f64>| -> Vec<f64> {
            years
                .iter()
                .map(|year| map.get(year).copied().unwrap_or(0.0))
                .collect()
        };
        let fisheries = self
            .ledgers
            .fisheries
            .iter()
            .map(|fishery| FisheryReport {
                label: fishery.label.clone(),
                years: years.clone(),
                catch: series(&fishery.catches),
                actual_catch: series(&fishery.actual_catches),
                f: series(&fishery.f_by_year),
            })
            .collect();
        Some(ProcessReport {
            label: self.label.clone(),
            fisheries,
        })
    }
}

impl Removals for MortalityHybrid {
    fn fishery_indices(&self, labels: &[String]) -> Result<Vec<usize>> {
        self.ledgers.fishery_indices(labels)
    }

    fn category_indices(&self, labels: &[String]) -> Result<Vec<usize>> {
        self.ledgers.category_indices(labels)
    }

    fn year_indices(&self, years: &[u32]) -> Result<Vec<usize>> {
        self.ledgers.year_indices(years)
    }

    fn catch_at_age(&self, year_idx: usize, fishery_idx: usize, category_idx: usize) -> &[f64] {
        self.removals.row(year_idx, fishery_idx, category_idx)
    }

    fn has_methods(&self, methods: &[String]) -> bool {
        methods
            .iter()
            .all(|method| self.ledgers.fishery_index(method).is_some())
    }

    fn categories_in_methods(&self, methods: &[String], categories: &[String]) -> bool {
        methods.iter().all(|method| {
            self.ledgers.fishery_index(method).is_some_and(|i_fish| {
                categories.iter().all(|cat| {
                    self.ledgers
                        .fishery_categories(i_fish)
                        .any(|linked| linked == cat.as_str())
                })
            })
        })
    }

    fn catch_in_years(&self, years: &[u32], methods: &[String]) -> bool {
        methods.iter().all(|method| {
            self.ledgers.fishery_index(method).is_some_and(|i_fish| {
                let fishery = &self.ledgers.fisheries[i_fish];
                years.iter().all(|&year| fishery.catch(year) > 0.0)
            })
        })
    }
}
