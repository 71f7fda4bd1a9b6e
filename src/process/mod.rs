//! Processes that change the partition within a time step.

mod ageing;
mod hybrid;
mod mortality_constant;
mod recruitment;

pub use ageing::Ageing;
pub use hybrid::MortalityHybrid;
pub use mortality_constant::MortalityConstantRate;
pub use recruitment::RecruitmentConstant;

use crate::age_weight::AgeWeights;
use crate::config::{Config, ProcessConfig, ProcessKind};
use crate::partition::Partition;
use crate::penalty::Penalties;
use crate::report::ProcessReport;
use crate::selectivity::Selectivities;
use anyhow::{Context, Result, bail};

/// Phase of the model run.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RunState {
    /// Annual cycles run before the first model year to reach equilibrium.
    Initialise,
    /// Model years.
    Execute,
}

/// Everything a process may read or write while executing, besides the partition.
pub struct StepContext<'a> {
    pub year: u32,
    pub time_step: usize,
    pub state: RunState,
    pub selectivities: &'a Selectivities,
    pub age_weights: &'a AgeWeights,
    pub penalties: &'a mut Penalties,
}

/// Read-only model information available while building a process.
pub struct BuildContext<'a> {
    pub cfg: &'a Config,
    pub partition: &'a Partition,
    pub selectivities: &'a Selectivities,
    pub age_weights: &'a AgeWeights,
    pub penalties: &'a Penalties,
    /// Ordered labels of every time step of the annual cycle.
    pub time_steps: Vec<String>,
    /// Indices of the time steps this process is attached to.
    pub attached: Vec<usize>,
}

impl BuildContext<'_> {
    pub fn category(&self, label: &str) -> Result<usize, BuildError> {
        self.partition
            .category_index(label)
            .ok_or_else(|| BuildError::UnknownCategory(label.to_string()))
    }

    pub fn selectivity(&self, label: &str) -> Result<usize, BuildError> {
        self.selectivities
            .index(label)
            .ok_or_else(|| BuildError::UnknownSelectivity(label.to_string()))
    }

    pub fn time_step(&self, label: &str) -> Result<usize, BuildError> {
        self.time_steps
            .iter()
            .position(|ts| ts == label)
            .ok_or_else(|| BuildError::UnknownTimeStep(label.to_string()))
    }

    /// Spread `proportions` over every time step of the cycle (zero where the
    /// process is not attached). An empty list splits evenly.
    pub fn time_step_ratios(&self, proportions: &[f64]) -> Result<Vec<f64>, BuildError> {
        let n_attached = self.attached.len();
        let proportions = if proportions.is_empty() && n_attached > 0 {
            vec![1.0 / n_attached as f64; n_attached]
        } else {
            proportions.to_vec()
        };
        if proportions.len() != n_attached {
            return Err(BuildError::RatioCount {
                expected: n_attached,
                found: proportions.len(),
            });
        }
        if proportions.iter().any(|&ratio| ratio < 0.0) {
            return Err(BuildError::NegativeRatio);
        }
        let sum: f64 = proportions.iter().sum();
        if (sum - 1.0).abs() > 1e-8 {
            return Err(BuildError::RatioSum(sum));
        }
        let mut ratios = vec![0.0; self.time_steps.len()];
        for (&i_ts, &ratio) in self.attached.iter().zip(&proportions) {
            ratios[i_ts] = ratio;
        }
        Ok(ratios)
    }
}

/// Configuration problems found while building a process.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("category {0} was not found")]
    UnknownCategory(String),
    #[error("selectivity {0} was not found")]
    UnknownSelectivity(String),
    #[error("time step {0} was not found")]
    UnknownTimeStep(String),
    #[error("penalty {0} was not found")]
    UnknownPenalty(String),
    #[error("age weight {0} was not found")]
    UnknownAgeWeight(String),
    #[error("category {0} is used by a method but is not one of the process categories")]
    CategoryNotInProcess(String),

    #[error("the {table} table has no {column} column")]
    MissingColumn { table: &'static str, column: String },
    #[error("the {table} table is malformed: {reason}")]
    BadTable { table: &'static str, reason: String },
    #[error("row {row} of the {table} table: {reason}")]
    BadCell {
        table: &'static str,
        row: usize,
        reason: String,
    },
    #[error("fishery {0} has no column in the catches table")]
    MissingCatches(String),
    #[error("year {0} is not a model year")]
    YearOutOfRange(u32),
    #[error("year {0} appears more than once in the catches table")]
    DuplicateYear(u32),

    #[error("fishery {fishery} has annual duration {value}, which must be in (0, 1]")]
    SeasonLengthOutOfRange { fishery: String, value: f64 },
    #[error("fishery {fishery} is given annual durations {first} and {second}")]
    InconsistentSeasonLength {
        fishery: String,
        first: f64,
        second: f64,
    },
    #[error(
        "fisheries {first} and {second} share time step {time_step} but have different annual durations"
    )]
    SeasonLengthMismatch {
        time_step: String,
        first: String,
        second: String,
    },
    #[error("fishery {fishery} is found in time steps {first} and {second}; define one fishery per time step")]
    FisheryInMultipleTimeSteps {
        fishery: String,
        first: String,
        second: String,
    },
    #[error("fishery {fishery} uses time step {time_step}, which does not run this process")]
    DetachedTimeStep { fishery: String, time_step: String },
    #[error("fishery {fishery} is linked to category {category} more than once")]
    DuplicateLink { fishery: String, category: String },

    #[error("{expected} time step proportions are needed, but {found} were given")]
    RatioCount { expected: usize, found: usize },
    #[error("time step proportions cannot be negative")]
    NegativeRatio,
    #[error("time step proportions must sum to 1.0, but sum to {0}")]
    RatioSum(f64),

    #[error("{what}: expected {expected} values, but {found} were given")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("an age weight column requires catches as biomass")]
    AgeWeightWithNumbers,
    #[error("category {category} is given age weights {first} and {second}")]
    ConflictingAgeWeight {
        category: String,
        first: String,
        second: String,
    },
    #[error("age {age} is outside the ages of category {category}")]
    AgeOutOfRange { category: String, age: u32 },
}

/// Removals recorded by a mortality process, as read by observations.
///
/// Index lookups are done once when an observation is built; the accessors
/// then take the precomputed indices.
pub trait Removals {
    fn fishery_indices(&self, labels: &[String]) -> Result<Vec<usize>>;
    fn category_indices(&self, labels: &[String]) -> Result<Vec<usize>>;
    fn year_indices(&self, years: &[u32]) -> Result<Vec<usize>>;

    /// Catch at age in numbers, indexed by model age.
    fn catch_at_age(&self, year_idx: usize, fishery_idx: usize, category_idx: usize) -> &[f64];

    /// Every label is a known fishery.
    fn has_methods(&self, methods: &[String]) -> bool;
    /// Every category is fished by every method.
    fn categories_in_methods(&self, methods: &[String], categories: &[String]) -> bool;
    /// Every method has a positive catch in every year.
    fn catch_in_years(&self, years: &[u32], methods: &[String]) -> bool;
}

/// A process of the annual cycle.
pub trait Process {
    fn label(&self) -> &str;

    fn execute(&mut self, ctx: &mut StepContext, partition: &mut Partition);

    /// Recompute anything derived from parameters that changed.
    fn rebuild_cache(&mut self) {}

    fn set_parameter(&mut self, name: &str, key: Option<&str>, _value: f64) -> Result<()> {
        let key = key.map(|key| format!("{{{key}}}")).unwrap_or_default();
        bail!("process {} has no addressable parameter {name}{key}", self.label())
    }

    /// Set a parameter from an override that applies from the start of `year`.
    fn set_parameter_in_year(&mut self, name: &str, key: Option<&str>, _year: u32, value: f64) -> Result<()> {
        self.set_parameter(name, key, value)
    }

    /// Labels of the selectivities this process evaluates.
    fn selectivity_labels(&self) -> Vec<String> {
        Vec::new()
    }

    fn removals(&self) -> Option<&dyn Removals> {
        None
    }

    fn report(&self) -> Option<ProcessReport> {
        None
    }
}

/// Build a process from its configuration.
pub fn build(cfg: &ProcessConfig, ctx: &BuildContext) -> Result<Box<dyn Process>> {
    let label = cfg.label.as_str();
    let process: Box<dyn Process> = match &cfg.kind {
        ProcessKind::Ageing { categories } => {
            Box::new(with_label(Ageing::new(label, categories, ctx), label)?)
        }
        ProcessKind::RecruitmentConstant {
            categories,
            proportions,
            r0,
            age,
        } => Box::new(with_label(
            RecruitmentConstant::new(label, categories, proportions, *r0, *age, ctx),
            label,
        )?),
        ProcessKind::MortalityConstantRate {
            categories,
            m,
            relative_m_by_age,
            time_step_proportions,
        } => Box::new(with_label(
            MortalityConstantRate::new(
                label,
                categories,
                m,
                relative_m_by_age,
                time_step_proportions,
                ctx,
            ),
            label,
        )?),
        ProcessKind::MortalityHybrid(hybrid) => {
            Box::new(with_label(MortalityHybrid::new(label, hybrid, ctx), label)?)
        }
    };
    Ok(process)
}

/// Check that a one-or-per-category list has a valid length.
fn check_count(what: &'static str, found: usize, expected: usize) -> Result<(), BuildError> {
    if found != 1 && found != expected {
        return Err(BuildError::CountMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

/// Report the build error with the process label attached.
fn with_label<T>(res: Result<T, BuildError>, label: &str) -> Result<T> {
    res.with_context(|| format!("failed to build process {label}"))
}
