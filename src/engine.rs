use crate::addressable::{Owner, ParameterPath, Subscriptions};
use crate::age_weight::AgeWeights;
use crate::config::Config;
use crate::derived::{Biomass, View};
use crate::partition::Partition;
use crate::penalty::Penalties;
use crate::process::{self, BuildContext, Process, Removals, RunState, StepContext};
use crate::report::Report;
use crate::selectivity::Selectivities;
use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;

/// A parameter override applied at the start of some years.
struct TimeVarying {
    path: ParameterPath,
    values: BTreeMap<u32, f64>,
}

/// Simulation engine.
///
/// Owns the partition and every model component built from the
/// configuration, and runs the annual cycle over the initialisation and
/// model years.
pub struct Engine {
    cfg: Config,
    partition: Partition,
    selectivities: Selectivities,
    age_weights: AgeWeights,
    penalties: Penalties,
    processes: Vec<Box<dyn Process>>,
    /// Process indices of each time step, in execution order.
    schedule: Vec<Vec<usize>>,
    derived: Vec<Biomass>,
    subscriptions: Subscriptions,
    time_varying: Vec<TimeVarying>,
    /// Parameters set directly, re-applied at the start of every run.
    overrides: Vec<(ParameterPath, f64)>,
}

fn build_processes(
    cfg: &Config,
    partition: &Partition,
    selectivities: &Selectivities,
    age_weights: &AgeWeights,
    penalties: &Penalties,
) -> Result<Vec<Box<dyn Process>>> {
    let time_steps: Vec<String> = cfg.time_steps.iter().map(|ts| ts.label.clone()).collect();
    let mut processes = Vec::with_capacity(cfg.processes.len());
    for proc_cfg in &cfg.processes {
        let attached: Vec<usize> = cfg
            .time_steps
            .iter()
            .enumerate()
            .filter(|(_, ts)| ts.processes.contains(&proc_cfg.label))
            .map(|(i_ts, _)| i_ts)
            .collect();
        if attached.is_empty() {
            log::warn!("process {} is not used by any time step", proc_cfg.label);
            continue;
        }
        let ctx = BuildContext {
            cfg,
            partition,
            selectivities,
            age_weights,
            penalties,
            time_steps: time_steps.clone(),
            attached,
        };
        processes.push(process::build(proc_cfg, &ctx)?);
    }
    Ok(processes)
}

impl Engine {
    /// Build every model component from the configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        let partition = Partition::new(&cfg);
        let selectivities = Selectivities::new(&cfg);
        let age_weights = AgeWeights::new(&cfg);
        let penalties = Penalties::new(&cfg);
        let time_steps: Vec<String> = cfg.time_steps.iter().map(|ts| ts.label.clone()).collect();

        let processes = build_processes(&cfg, &partition, &selectivities, &age_weights, &penalties)?;

        let schedule = cfg
            .time_steps
            .iter()
            .map(|ts| {
                ts.processes
                    .iter()
                    .map(|label| {
                        processes
                            .iter()
                            .position(|proc| proc.label() == label)
                            .with_context(|| format!("process {label} was not built"))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<_>>()?;

        let view = View {
            partition: &partition,
            selectivities: &selectivities,
            age_weights: &age_weights,
        };
        let derived = cfg
            .derived_quantities
            .iter()
            .map(|dq| {
                Biomass::new(dq, &time_steps, &view)
                    .with_context(|| format!("failed to build derived quantity {}", dq.label))
            })
            .collect::<Result<_>>()?;

        let mut subscriptions = Subscriptions::default();
        for (i_proc, proc) in processes.iter().enumerate() {
            subscriptions.subscribe(Owner::Process, proc.label(), i_proc);
            for sel in proc.selectivity_labels() {
                subscriptions.subscribe(Owner::Selectivity, &sel, i_proc);
            }
        }

        let time_varying = cfg
            .time_varying
            .iter()
            .map(|tv| {
                let path: ParameterPath = tv.parameter.parse()?;
                let known = match path.owner {
                    Owner::Process => processes.iter().any(|proc| proc.label() == path.label),
                    Owner::Selectivity => selectivities.index(&path.label).is_some(),
                };
                if !known {
                    bail!("time varying parameter {path} has an unknown owner");
                }
                for year in &tv.years {
                    if !(cfg.model.start_year..=cfg.model.final_year).contains(year) {
                        bail!("time varying parameter {path} has a value for {year}, which is not a model year");
                    }
                }
                let values = tv.years.iter().copied().zip(tv.values.iter().copied()).collect();
                Ok(TimeVarying { path, values })
            })
            .collect::<Result<_>>()?;

        log::info!(
            "built {} processes over {} time steps",
            processes.len(),
            time_steps.len()
        );

        Ok(Self {
            cfg,
            partition,
            selectivities,
            age_weights,
            penalties,
            processes,
            schedule,
            derived,
            subscriptions,
            time_varying,
            overrides: Vec::new(),
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Removals recorded by the process with the given label, if it records any.
    pub fn removals(&self, process: &str) -> Option<&dyn Removals> {
        self.processes
            .iter()
            .find(|proc| proc.label() == process)?
            .removals()
    }

    /// Set an addressable parameter, e.g. `selectivity[fish_sel].a50`.
    pub fn set_parameter(&mut self, path: &str, value: f64) -> Result<()> {
        let path: ParameterPath = path.parse()?;
        self.assign(&path, None, value)?;
        self.overrides.push((path, value));
        Ok(())
    }

    fn assign(&mut self, path: &ParameterPath, year: Option<u32>, value: f64) -> Result<()> {
        match path.owner {
            Owner::Process => {
                let proc = self
                    .processes
                    .iter_mut()
                    .find(|proc| proc.label() == path.label)
                    .with_context(|| format!("process {} was not found", path.label))?;
                let key = path.key.as_deref();
                let res = match year {
                    Some(year) => proc.set_parameter_in_year(&path.name, key, year, value),
                    None => proc.set_parameter(&path.name, key, value),
                };
                res.with_context(|| format!("failed to set {path}"))?;
            }
            Owner::Selectivity => {
                if path.key.is_some() {
                    bail!("selectivity parameters take no key, but {path} has one");
                }
                self.selectivities
                    .set_parameter(&path.label, &path.name, value)
                    .with_context(|| format!("failed to set {path}"))?;
            }
        }
        log::debug!("set {path} = {value}");

        for &i_proc in self.subscriptions.subscribers(path.owner, &path.label) {
            self.processes[i_proc].rebuild_cache();
        }
        Ok(())
    }

    fn apply_time_varying(&mut self, year: u32) -> Result<()> {
        let updates: Vec<(ParameterPath, f64)> = self
            .time_varying
            .iter()
            .filter_map(|tv| tv.values.get(&year).map(|&value| (tv.path.clone(), value)))
            .collect();
        for (path, value) in updates {
            self.assign(&path, Some(year), value)?;
        }
        Ok(())
    }

    /// Restore the configured state, then re-apply the direct overrides.
    fn reset(&mut self) -> Result<()> {
        self.partition = Partition::new(&self.cfg);
        self.selectivities = Selectivities::new(&self.cfg);
        self.penalties.reset();
        self.processes = build_processes(
            &self.cfg,
            &self.partition,
            &self.selectivities,
            &self.age_weights,
            &self.penalties,
        )?;
        for dq in &mut self.derived {
            dq.reset();
        }
        for (path, value) in self.overrides.clone() {
            self.assign(&path, None, value)?;
        }
        Ok(())
    }

    /// Run the initialisation cycles and every model year.
    pub fn run(&mut self) -> Result<Report> {
        self.reset().context("failed to reset model")?;

        let n_init = self.cfg.model.initialisation_years();
        let start_year = self.cfg.model.start_year;
        for _ in 0..n_init {
            self.run_year(start_year, RunState::Initialise);
        }
        log::info!("completed {n_init} initialisation years");

        let years = self.cfg.model.years();
        for (i_year, &year) in years.iter().enumerate() {
            self.apply_time_varying(year)
                .with_context(|| format!("failed to apply time varying parameters in {year}"))?;
            self.run_year(year, RunState::Execute);

            let progress = 100.0 * (i_year + 1) as f64 / years.len() as f64;
            log::info!("completed {progress:06.2}%");
        }

        Ok(self.report())
    }

    fn run_year(&mut self, year: u32, state: RunState) {
        for (i_ts, procs) in self.schedule.iter().enumerate() {
            let view = View {
                partition: &self.partition,
                selectivities: &self.selectivities,
                age_weights: &self.age_weights,
            };
            for dq in self.derived.iter_mut().filter(|dq| dq.time_step() == i_ts) {
                dq.pre_execute(&view);
            }

            for &i_proc in procs {
                let mut ctx = StepContext {
                    year,
                    time_step: i_ts,
                    state,
                    selectivities: &self.selectivities,
                    age_weights: &self.age_weights,
                    penalties: &mut self.penalties,
                };
                self.processes[i_proc].execute(&mut ctx, &mut self.partition);
            }

            let view = View {
                partition: &self.partition,
                selectivities: &self.selectivities,
                age_weights: &self.age_weights,
            };
            for dq in self.derived.iter_mut().filter(|dq| dq.time_step() == i_ts) {
                dq.execute(year, state, &view);
            }
        }
    }

    pub fn report(&self) -> Report {
        Report {
            years: self.cfg.model.years(),
            derived: self.derived.iter().map(Biomass::report).collect(),
            processes: self.processes.iter().filter_map(|proc| proc.report()).collect(),
            penalties: self.penalties.scores().to_vec(),
            penalty_total: self.penalties.total(),
            partition: self.partition.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::base_toml;

    const CATCHES: [(u32, f64); 31] = [
        (1971, 0.0),
        (1972, 200.0),
        (1973, 1000.0),
        (1974, 1000.0),
        (1975, 2000.0),
        (1976, 3000.0),
        (1977, 4000.0),
        (1978, 5000.0),
        (1979, 6000.0),
        (1980, 8000.0),
        (1981, 10000.0),
        (1982, 10000.0),
        (1983, 10000.0),
        (1984, 10000.0),
        (1985, 10000.0),
        (1986, 10000.0),
        (1987, 10000.0),
        (1988, 9000.0),
        (1989, 8000.0),
        (1990, 7000.0),
        (1991, 6000.0),
        (1992, 4000.0),
        (1993, 4000.0),
        (1994, 4000.0),
        (1995, 4000.0),
        (1996, 4000.0),
        (1997, 3000.0),
        (1998, 3000.0),
        (1999, 3000.0),
        (2000, 3000.0),
        (2001, 3000.0),
    ];

    /// Mean weight in tonnes from a von Bertalanffy length and a power
    /// length-weight curve, with lengths lognormal around the mean (CV 0.05).
    fn weight_at_age(age: f64) -> f64 {
        let (a, b, cv): (f64, f64, f64) = (2.44e-6, 3.34694, 0.05);
        let length = 68.0 * (1.0 - (-0.167 * age).exp());
        let spread = (1.0 + cv * cv).powf(b * (b - 1.0) / 2.0);
        a * length.powf(b) * spread / 1000.0
    }

    fn toml_list(values: impl Iterator<Item = f64>) -> String {
        values.map(|val| format!("{val:?}")).collect::<Vec<_>>().join(", ")
    }

    const R0: f64 = 18958355.0;
    const ONE_FISHERY: [(&str, &str, f64); 1] = [("Fishery1", "fish_sel", 1.0)];

    /// Two-sex stock recruiting `r0` a year, fished by `(label, selectivity,
    /// share of the catch history)` fisheries.
    fn scenario(r0: f64, fisheries: &[(&str, &str, f64)]) -> String {
        let catch_weight = toml_list((1..=40).map(|age| weight_at_age(age as f64 + 0.5)));
        let spawn_weight = toml_list((1..=40).map(|age| weight_at_age(age as f64)));
        let columns = fisheries
            .iter()
            .map(|(label, _, _)| format!("{label:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = CATCHES
            .iter()
            .map(|(year, catch)| {
                let catches = fisheries.iter().map(|(_, _, share)| catch * share);
                format!("[{year}, {}]", toml_list(catches))
            })
            .collect::<Vec<_>>()
            .join(",\n  ");
        let methods = fisheries
            .iter()
            .map(|(label, sel, _)| format!(r#"["{label}", "male,female", "{sel},{sel}", "step1", "catch_penalty", 1.0]"#))
            .collect::<Vec<_>>()
            .join(",\n  ");

        format!(
            r#"
[model]
start_year = 1970
final_year = 2001
min_age = 1
max_age = 40
initialisation_years = 120

[[time_steps]]
label = "spawn"
processes = []

[[time_steps]]
label = "step1"
processes = ["recruitment", "instant_mort", "ageing"]

[[categories]]
label = "male"
mean_weight = [{catch_weight}]

[[categories]]
label = "female"
mean_weight = [{catch_weight}]

[[selectivities]]
label = "one"
type = "constant"
c = 1.0

[[selectivities]]
label = "fish_sel"
type = "logistic"
a50 = 4.0
ato95 = 3.0

[[selectivities]]
label = "fish_sel_2"
type = "logistic"
a50 = 5.0
ato95 = 3.5

[[selectivities]]
label = "maturity"
type = "logistic"
a50 = 5.0
ato95 = 3.0

[[age_weights]]
label = "spawn_weight"
values = [{spawn_weight}]

[[penalties]]
label = "catch_penalty"
type = "process"

[[derived_quantities]]
label = "ssb"
type = "biomass"
time_step = "spawn"
categories = ["female"]
selectivities = ["maturity"]
age_weights = ["spawn_weight"]

[[processes]]
label = "recruitment"
type = "recruitment_constant"
categories = ["male", "female"]
proportions = [0.5, 0.5]
r0 = {r0:?}

[[processes]]
label = "ageing"
type = "ageing"
categories = ["male", "female"]

[[processes]]
label = "instant_mort"
type = "mortality_hybrid"
categories = ["male", "female"]
m = [0.15]
relative_m_by_age = ["one"]
time_step_proportions = [1.0]
max_f = 2.95
f_iterations = 5

[processes.catches]
columns = ["year", {columns}]
rows = [
  {rows}
]

[processes.method]
columns = ["method", "category", "selectivity", "time_step", "penalty", "annual_duration"]
rows = [
  {methods}
]
"#
        )
    }

    fn run(toml: &str) -> (Engine, Report) {
        let mut engine = Engine::new(Config::from_toml(toml).unwrap()).unwrap();
        let report = engine.run().unwrap();
        (engine, report)
    }

    #[test]
    fn initialisation_reaches_the_equilibrium_age_structure() {
        let (engine, report) = run(&base_toml());
        let stock = &engine.partition().categories[0];

        // Recruits arrive, die at rate 0.2 and age by one year.
        assert_eq!(stock.data[0], 0.0);
        for i_age in 1..4 {
            let expected = 1000.0 * (-0.2 * i_age as f64).exp();
            assert!((stock.data[i_age] - expected).abs() < 1e-9);
        }
        let plus_group = 1000.0 * (-0.8_f64).exp() / (1.0 - (-0.2_f64).exp());
        assert!((stock.data[4] - plus_group).abs() < 0.03 * plus_group);

        assert_eq!(report.years, vec![2000, 2001, 2002, 2003, 2004]);
        assert!(report.processes.is_empty());
        assert_eq!(report.partition, *engine.partition());
    }

    #[test]
    fn time_varying_overrides_apply_from_their_year() {
        let toml = base_toml()
            + r#"
[[time_varying]]
parameter = "process[mortality].m{stock}"
years = [2004]
values = [0.0]
"#;
        let (mut engine, first) = run(&toml);
        let stock = &engine.partition().categories[0];
        assert!((stock.data[1] - 1000.0).abs() < 1e-9);
        assert!((stock.data[2] - 1000.0 * (-0.2_f64).exp()).abs() < 1e-9);

        // The override does not leak into the initialisation of the next run.
        let second = engine.run().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn time_varying_needs_a_known_owner_and_model_years() {
        let toml = base_toml()
            + r#"
[[time_varying]]
parameter = "process[missing].m{stock}"
years = [2004]
values = [0.0]
"#;
        assert!(Engine::new(Config::from_toml(&toml).unwrap()).is_err());

        let toml = base_toml()
            + r#"
[[time_varying]]
parameter = "process[mortality].m{stock}"
years = [1999]
values = [0.0]
"#;
        assert!(Engine::new(Config::from_toml(&toml).unwrap()).is_err());
    }

    #[test]
    fn selectivity_parameters_are_addressable() {
        let mut engine = Engine::new(Config::from_toml(&base_toml()).unwrap()).unwrap();
        engine.set_parameter("selectivity[one].c", 0.0).unwrap();
        engine.run().unwrap();
        assert!((engine.partition().categories[0].data[1] - 1000.0).abs() < 1e-9);

        assert!(engine.set_parameter("selectivity[one].a50", 1.0).is_err());
        assert!(engine.set_parameter("selectivity[one].c{x}", 1.0).is_err());
        assert!(engine.set_parameter("process[ageing].r0", 1.0).is_err());
        assert!(engine.set_parameter("process[recruitment].r0", 500.0).is_ok());
    }

    #[test]
    fn single_fishery_takes_its_catch_and_depletes_the_stock() {
        let (engine, report) = run(&scenario(R0, &ONE_FISHERY));

        let ssb = report.derived("ssb").unwrap();
        assert_eq!(ssb.years.len(), 32);
        assert!(ssb.values.iter().all(|ssb| ssb.is_finite() && *ssb > 0.0));
        let b0 = ssb.initialisation_value.unwrap();
        let at = |year: u32| ssb.values[(year - 1970) as usize];
        assert!((at(1970) - b0).abs() < 1e-4 * b0);
        assert!(at(1975) < b0);
        assert!(at(1988) < at(1975));

        let fishery = report.fishery("instant_mort", "Fishery1").unwrap();
        assert_eq!(fishery.years.len(), 31);
        for ((catch, actual), f) in fishery.catch.iter().zip(&fishery.actual_catch).zip(&fishery.f) {
            assert!((catch - actual).abs() <= 1e-3 * catch.max(1.0));
            assert!(*f >= 0.0 && *f < 2.95);
        }
        assert_eq!(fishery.f[0], 0.0);
        assert_eq!(report.penalties.len(), 31);

        let removals = engine.removals("instant_mort").unwrap();
        assert!(removals.catch_in_years(&[1972, 2001], &["Fishery1".into()]));
        assert!(!removals.catch_in_years(&[1971], &["Fishery1".into()]));
        let year_idx = removals.year_indices(&[1981]).unwrap()[0];
        let catch_at_age: f64 = removals.catch_at_age(year_idx, 0, 1).iter().sum();
        assert!(catch_at_age > 0.0);
        assert!(engine.removals("ageing").is_none());
    }

    fn assert_ssb_matches(report: &Report, expected: &[f64]) {
        let ssb = report.derived("ssb").unwrap();
        assert_eq!(ssb.years, (1970..=2001).collect::<Vec<_>>());
        for ((year, value), reference) in ssb.years.iter().zip(&ssb.values).zip(expected) {
            assert!(
                (value - reference).abs() <= 1.0,
                "SSB in {year} is {value}, expected {reference}"
            );
        }
    }

    #[test]
    fn single_fishery_matches_reference_ssb() {
        let expected = [
            58140.1, 58140.1, 58140.1, 58046.3, 57580.8, 57132.4, 56238.1, 54918.6, 53198.2,
            51103.9, 48663.7, 45438.5, 41467.9, 37719.5, 34206.0, 30929.5, 27881.9, 25047.0,
            22403.1, 20381.1, 18963.1, 18132.9, 17876.8, 18638.3, 19527.6, 20494.9, 21496.9,
            22500.1, 23941.6, 25368.3, 26755.8, 28084.9,
        ];
        let (_, report) = run(&scenario(R0, &ONE_FISHERY));
        assert_ssb_matches(&report, &expected);
    }

    #[test]
    fn two_fisheries_with_different_selectivities_match_reference_ssb() {
        let expected = [
            105938.0, 105938.0, 105938.0, 105797.0, 105098.0, 104428.0, 103089.0, 101117.0,
            98548.3, 95426.1, 91793.4, 86990.6, 81081.8, 75531.0, 70356.8, 65562.8, 61139.3,
            57065.6, 53314.7, 50549.8, 48739.5, 47850.2, 47846.6, 49386.4, 51053.1, 52774.3,
            54490.3, 56157.1, 58444.8, 60644.5, 62729.8, 64682.2,
        ];
        let fisheries = [("Fishery1", "fish_sel", 1.0), ("Fishery2", "fish_sel_2", 0.5)];
        let (_, report) = run(&scenario(34544375.0, &fisheries));
        assert_ssb_matches(&report, &expected);

        let second = report.fishery("instant_mort", "Fishery2").unwrap();
        assert_eq!(second.catch[1], 100.0);
        for (catch, actual) in second.catch.iter().zip(&second.actual_catch) {
            assert!((catch - actual).abs() <= 1e-3 * catch.max(1.0));
        }
    }

    #[test]
    fn splitting_the_catch_between_two_fisheries_gives_the_same_stock() {
        let (_, one) = run(&scenario(R0, &ONE_FISHERY));
        let halves = [("Fishery1", "fish_sel", 0.5), ("Fishery2", "fish_sel", 0.5)];
        let (_, two) = run(&scenario(R0, &halves));

        let ssb_one = &one.derived("ssb").unwrap().values;
        let ssb_two = &two.derived("ssb").unwrap().values;
        assert_eq!(ssb_one.len(), ssb_two.len());
        for (a, b) in ssb_one.iter().zip(ssb_two) {
            assert!((a - b).abs() < 1.0, "{a} and {b} differ");
        }
        assert_eq!(two.penalties.len(), 62);
    }

    #[test]
    fn catch_overrides_rebuild_the_observed_totals() {
        let toml = scenario(R0, &ONE_FISHERY)
            + r#"
[[time_varying]]
parameter = "process[instant_mort].catches{Fishery1}"
years = [1981]
values = [0.0]
"#;
        let (_, report) = run(&toml);
        let fishery = report.fishery("instant_mort", "Fishery1").unwrap();
        let i_1981 = fishery.years.iter().position(|&year| year == 1981).unwrap();
        assert_eq!(fishery.catch[i_1981], 0.0);
        assert_eq!(fishery.f[i_1981], 0.0);
        assert!(fishery.f[i_1981 + 1] > 0.0);
    }

    #[test]
    fn rerunning_gives_the_same_report() {
        let mut engine = Engine::new(Config::from_toml(&scenario(R0, &ONE_FISHERY)).unwrap()).unwrap();
        let first = engine.run().unwrap();
        let second = engine.run().unwrap();
        assert_eq!(first, second);
    }
}
