use crate::table::Table;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Model configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Year range, age range and initialisation settings.
    pub model: ModelConfig,

    /// Ordered time steps of the annual cycle.
    pub time_steps: Vec<TimeStepConfig>,

    /// Partition categories.
    pub categories: Vec<CategoryConfig>,

    #[serde(default)]
    pub selectivities: Vec<SelectivityConfig>,
    #[serde(default)]
    pub age_weights: Vec<AgeWeightConfig>,
    #[serde(default)]
    pub penalties: Vec<PenaltyConfig>,
    #[serde(default)]
    pub derived_quantities: Vec<DerivedQuantityConfig>,
    #[serde(default)]
    pub time_varying: Vec<TimeVaryingConfig>,

    /// Process definitions, referenced by label from the time steps.
    pub processes: Vec<ProcessConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub start_year: u32,
    pub final_year: u32,
    pub min_age: u32,
    pub max_age: u32,
    #[serde(default = "default_true")]
    pub plus_group: bool,
    /// Number of annual cycles run before `start_year`. Defaults to three
    /// times the age spread.
    #[serde(default)]
    pub initialisation_years: Option<usize>,
}

impl ModelConfig {
    pub fn years(&self) -> Vec<u32> {
        (self.start_year..=self.final_year).collect()
    }

    pub fn age_spread(&self) -> usize {
        (self.max_age - self.min_age + 1) as usize
    }

    pub fn initialisation_years(&self) -> usize {
        self.initialisation_years
            .unwrap_or(3 * self.age_spread())
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TimeStepConfig {
    pub label: String,
    pub processes: Vec<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub label: String,
    /// Defaults to the model minimum age.
    #[serde(default)]
    pub min_age: Option<u32>,
    /// Defaults to the model maximum age.
    #[serde(default)]
    pub max_age: Option<u32>,
    /// Mean weight at age: one value, or one per age of the category.
    pub mean_weight: Vec<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SelectivityConfig {
    pub label: String,
    #[serde(flatten)]
    pub curve: Curve,
}

/// Selectivity curve shapes.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Curve {
    Constant {
        c: f64,
    },
    Logistic {
        a50: f64,
        ato95: f64,
        #[serde(default = "default_one")]
        alpha: f64,
    },
    /// One value per model age.
    AllValues { values: Vec<f64> },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AgeWeightConfig {
    pub label: String,
    /// Weight at age: one value, or one per model age.
    pub values: Vec<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    Process,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: PenaltyKind,
    #[serde(default = "default_one")]
    pub multiplier: f64,
    #[serde(default)]
    pub log_scale: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    Biomass,
}

/// How a derived quantity blends its values before and after the time step.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProportionMethod {
    #[default]
    WeightedSum,
    WeightedProduct,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DerivedQuantityConfig {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: DerivedKind,
    pub time_step: String,
    pub categories: Vec<String>,
    /// One selectivity, or one per category.
    pub selectivities: Vec<String>,
    /// One age weight per category, used instead of the category mean weight.
    #[serde(default)]
    pub age_weights: Vec<String>,
    /// 0.0 evaluates before the time step's processes, 1.0 after.
    #[serde(default)]
    pub time_step_proportion: f64,
    #[serde(default)]
    pub proportion_method: ProportionMethod,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TimeVaryingConfig {
    /// Addressable parameter path, e.g. `process[mort].m{male}`.
    pub parameter: String,
    pub years: Vec<u32>,
    pub values: Vec<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub label: String,
    #[serde(flatten)]
    pub kind: ProcessKind,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessKind {
    Ageing {
        categories: Vec<String>,
    },
    RecruitmentConstant {
        categories: Vec<String>,
        proportions: Vec<f64>,
        r0: f64,
        /// Defaults to the model minimum age.
        #[serde(default)]
        age: Option<u32>,
    },
    MortalityConstantRate {
        categories: Vec<String>,
        m: Vec<f64>,
        relative_m_by_age: Vec<String>,
        #[serde(default)]
        time_step_proportions: Vec<f64>,
    },
    MortalityHybrid(HybridConfig),
}

/// Settings of the hybrid (multi-fishery catch-equation) mortality process.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub categories: Vec<String>,
    /// Natural mortality: one value, or one per category.
    pub m: Vec<f64>,
    /// M-by-age ogives: one label, or one per category.
    pub relative_m_by_age: Vec<String>,
    /// Share of M applied in each attached time step. Empty means an even split.
    #[serde(default)]
    pub time_step_proportions: Vec<f64>,
    /// Catches are biomass (true) or numbers (false).
    #[serde(default = "default_true")]
    pub biomass: bool,
    #[serde(default = "default_max_f")]
    pub max_f: f64,
    #[serde(default = "default_f_iterations")]
    pub f_iterations: usize,
    pub catches: Table,
    pub method: Table,
    #[serde(default)]
    pub constants: SolverConstants,
}

/// Numerical robustness constants of the catch-equation solver.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConstants {
    /// Guard added to every denominator.
    pub epsilon: f64,
    /// Fraction of the catch added to the vulnerable quantity for the initial Pope's rate.
    pub pope_catch_buffer: f64,
    /// Steepness of the logistic joiners.
    pub joiner_steepness: f64,
    /// Harvest rate at which the initial joiner bends, also scaled by max F later.
    pub joiner_knee: f64,
}

impl Default for SolverConstants {
    fn default() -> Self {
        Self {
            epsilon: 1e-4,
            pope_catch_buffer: 0.1,
            joiner_steepness: 30.0,
            joiner_knee: 0.95,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_max_f() -> f64 {
    4.0
}

fn default_f_iterations() -> usize {
    4
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let model = &self.model;
        check_num(model.start_year, 1..10_000).context("invalid start year")?;
        check_num(model.final_year, model.start_year..10_000).context("invalid final year")?;
        check_num(model.max_age, model.min_age..1_000).context("invalid maximum age")?;
        check_num(model.initialisation_years(), 1..100_000)
            .context("invalid number of initialisation years")?;

        if self.time_steps.is_empty() {
            bail!("at least one time step is required");
        }
        check_unique(self.time_steps.iter().map(|ts| ts.label.as_str()))
            .context("invalid time steps")?;

        if self.categories.is_empty() {
            bail!("at least one category is required");
        }
        check_unique(self.categories.iter().map(|cat| cat.label.as_str()))
            .context("invalid categories")?;
        for cat in &self.categories {
            let min_age = cat.min_age.unwrap_or(model.min_age);
            let max_age = cat.max_age.unwrap_or(model.max_age);
            check_num(min_age, model.min_age..=model.max_age)
                .with_context(|| format!("invalid minimum age of category {}", cat.label))?;
            check_num(max_age, min_age..=model.max_age)
                .with_context(|| format!("invalid maximum age of category {}", cat.label))?;
            let spread = (max_age - min_age + 1) as usize;
            check_broadcast(&cat.mean_weight, spread)
                .with_context(|| format!("invalid mean weight of category {}", cat.label))?;
        }

        check_unique(self.selectivities.iter().map(|sel| sel.label.as_str()))
            .context("invalid selectivities")?;
        for sel in &self.selectivities {
            if let Curve::AllValues { values } = &sel.curve {
                check_vec(values, model.age_spread(), false)
                    .with_context(|| format!("invalid values of selectivity {}", sel.label))?;
            }
            if let Curve::Logistic { ato95, .. } = &sel.curve {
                if *ato95 == 0.0 {
                    bail!("selectivity {} has ato95 = 0", sel.label);
                }
            }
        }

        check_unique(self.age_weights.iter().map(|aw| aw.label.as_str()))
            .context("invalid age weights")?;
        for aw in &self.age_weights {
            check_broadcast(&aw.values, model.age_spread())
                .with_context(|| format!("invalid values of age weight {}", aw.label))?;
        }

        check_unique(self.penalties.iter().map(|pen| pen.label.as_str()))
            .context("invalid penalties")?;

        check_unique(self.derived_quantities.iter().map(|dq| dq.label.as_str()))
            .context("invalid derived quantities")?;
        for dq in &self.derived_quantities {
            check_num(dq.time_step_proportion, 0.0..=1.0)
                .with_context(|| format!("invalid time step proportion of {}", dq.label))?;
        }

        for tv in &self.time_varying {
            check_vec(&tv.values, tv.years.len(), false)
                .with_context(|| format!("invalid time varying values for {}", tv.parameter))?;
        }

        check_unique(self.processes.iter().map(|proc| proc.label.as_str()))
            .context("invalid processes")?;
        for ts in &self.time_steps {
            for label in &ts.processes {
                if !self.processes.iter().any(|proc| &proc.label == label) {
                    bail!("time step {} references unknown process {label}", ts.label);
                }
            }
        }
        for proc in &self.processes {
            if let ProcessKind::RecruitmentConstant {
                categories,
                proportions,
                r0,
                ..
            } = &proc.kind
            {
                check_vec(proportions, categories.len(), true)
                    .with_context(|| format!("invalid proportions of {}", proc.label))?;
                check_num(*r0, 0.0..).with_context(|| format!("invalid r0 of {}", proc.label))?;
            }
            if let ProcessKind::MortalityHybrid(hybrid) = &proc.kind {
                check_num(hybrid.max_f, 0.0..)
                    .with_context(|| format!("invalid max_f of {}", proc.label))?;
                check_num(hybrid.f_iterations, 0..1_000)
                    .with_context(|| format!("invalid f_iterations of {}", proc.label))?;
                if hybrid.m.iter().any(|&m| m < 0.0) {
                    bail!("process {} has a negative natural mortality", proc.label);
                }
                let consts = &hybrid.constants;
                check_num(consts.epsilon, f64::MIN_POSITIVE..)
                    .with_context(|| format!("invalid epsilon of {}", proc.label))?;
                check_num(consts.pope_catch_buffer, f64::MIN_POSITIVE..)
                    .with_context(|| format!("invalid Pope catch buffer of {}", proc.label))?;
                check_num(consts.joiner_knee, 0.0..1.0)
                    .with_context(|| format!("invalid joiner knee of {}", proc.label))?;
            }
        }

        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

pub fn check_vec(vec: &[f64], exp_len: usize, prob_vec: bool) -> Result<()> {
    // Ensure vector has expected length.
    let len = vec.len();
    if len != exp_len {
        bail!("vector length must be {exp_len}, but is {len}");
    }
    if !prob_vec {
        return Ok(());
    }
    // For probability vectors: non-negative elements and sums to ~1.0.
    if vec.iter().any(|&ele| ele < 0.0) {
        bail!("vector must have only non-negative elements");
    }
    let sum: f64 = vec.iter().sum();
    let tol = 1e-8;
    if (sum - 1.0).abs() > tol {
        bail!("vector must sum to 1.0 (tolerance: {tol}), but sums to {sum}");
    }
    Ok(())
}

fn check_broadcast(vec: &[f64], exp_len: usize) -> Result<()> {
    if vec.len() != 1 && vec.len() != exp_len {
        bail!("vector length must be 1 or {exp_len}, but is {}", vec.len());
    }
    if vec.iter().any(|&ele| ele < 0.0) {
        bail!("vector must have only non-negative elements");
    }
    Ok(())
}

fn check_unique<'a>(labels: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for label in labels {
        if !seen.insert(label) {
            bail!("label {label:?} is defined more than once");
        }
    }
    Ok(())
}

/// Expand a one-or-per-entry vector to `len` entries.
pub fn broadcast<T: Clone>(vec: &[T], len: usize) -> Vec<T> {
    match vec {
        [single] => vec![single.clone(); len],
        _ => vec.to_vec(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal single-category model used across unit tests.
    pub(crate) fn base_toml() -> String {
        r#"
[model]
start_year = 2000
final_year = 2004
min_age = 1
max_age = 5
initialisation_years = 20

[[time_steps]]
label = "step1"
processes = ["recruitment", "mortality", "ageing"]

[[categories]]
label = "stock"
mean_weight = [1.0]

[[selectivities]]
label = "one"
type = "constant"
c = 1.0

[[processes]]
label = "recruitment"
type = "recruitment_constant"
categories = ["stock"]
proportions = [1.0]
r0 = 1000.0

[[processes]]
label = "ageing"
type = "ageing"
categories = ["stock"]

[[processes]]
label = "mortality"
type = "mortality_constant_rate"
categories = ["stock"]
m = [0.2]
relative_m_by_age = ["one"]
"#
        .to_string()
    }

    #[test]
    fn base_config_parses() {
        let cfg = Config::from_toml(&base_toml()).unwrap();
        assert_eq!(cfg.model.years().len(), 5);
        assert_eq!(cfg.model.age_spread(), 5);
        assert!(cfg.model.plus_group);
        assert_eq!(cfg.processes.len(), 3);
        assert!(matches!(
            cfg.processes[0].kind,
            ProcessKind::RecruitmentConstant { age: None, .. }
        ));
    }

    #[test]
    fn unknown_process_in_time_step_is_rejected() {
        let toml = base_toml().replace(r#""mortality", "ageing""#, r#""mortality", "missing""#);
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(format!("{err:#}").contains("unknown process missing"));
    }

    #[test]
    fn mean_weight_length_is_checked() {
        let toml = base_toml().replace("mean_weight = [1.0]", "mean_weight = [1.0, 2.0]");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn recruitment_proportions_must_sum_to_one() {
        let toml = base_toml().replace("proportions = [1.0]", "proportions = [0.9]");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn check_helpers() {
        assert!(check_num(5, 1..10).is_ok());
        assert!(check_num(10, 1..10).is_err());
        assert!(check_vec(&[0.5, 0.5], 2, true).is_ok());
        assert!(check_vec(&[0.5, 0.6], 2, true).is_err());
        assert!(check_vec(&[0.5], 2, false).is_err());
        assert_eq!(broadcast(&[2.0], 3), vec![2.0, 2.0, 2.0]);
        assert_eq!(broadcast(&[1.0, 2.0], 3), vec![1.0, 2.0]);
    }
}
