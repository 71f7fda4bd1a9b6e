use crate::age_weight::AgeWeights;
use crate::config::{DerivedQuantityConfig, ProportionMethod, broadcast};
use crate::partition::Partition;
use crate::process::RunState;
use crate::report::DerivedReport;
use crate::selectivity::Selectivities;
use anyhow::{Context, Result, bail};

struct Target {
    category: usize,
    selectivity: usize,
    age_weight: Option<usize>,
}

/// Model pieces a derived quantity reads.
pub struct View<'a> {
    pub partition: &'a Partition,
    pub selectivities: &'a Selectivities,
    pub age_weights: &'a AgeWeights,
}

/// Selected biomass of a set of categories, evaluated in one time step of each year.
pub struct Biomass {
    label: String,
    time_step: usize,
    proportion: f64,
    method: ProportionMethod,
    targets: Vec<Target>,
    /// Value before the time step's processes.
    cache: f64,
    initialisation_value: Option<f64>,
    years: Vec<u32>,
    values: Vec<f64>,
}

impl Biomass {
    pub fn new(cfg: &DerivedQuantityConfig, time_steps: &[String], view: &View) -> Result<Self> {
        let time_step = time_steps
            .iter()
            .position(|ts| *ts == cfg.time_step)
            .with_context(|| format!("time step {} was not found", cfg.time_step))?;

        let n_cats = cfg.categories.len();
        if cfg.selectivities.len() != 1 && cfg.selectivities.len() != n_cats {
            bail!(
                "{} selectivities are given for {n_cats} categories",
                cfg.selectivities.len()
            );
        }
        if !cfg.age_weights.is_empty() && cfg.age_weights.len() != n_cats {
            bail!(
                "{} age weights are given for {n_cats} categories",
                cfg.age_weights.len()
            );
        }
        let selectivities = broadcast(&cfg.selectivities, n_cats);

        let targets = cfg
            .categories
            .iter()
            .zip(&selectivities)
            .enumerate()
            .map(|(i_cat, (cat, sel))| {
                let age_weight = match cfg.age_weights.get(i_cat) {
                    Some(aw) => Some(
                        view.age_weights
                            .index(aw)
                            .with_context(|| format!("age weight {aw} was not found"))?,
                    ),
                    None => None,
                };
                Ok(Target {
                    category: view
                        .partition
                        .category_index(cat)
                        .with_context(|| format!("category {cat} was not found"))?,
                    selectivity: view
                        .selectivities
                        .index(sel)
                        .with_context(|| format!("selectivity {sel} was not found"))?,
                    age_weight,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            label: cfg.label.clone(),
            time_step,
            proportion: cfg.time_step_proportion,
            method: cfg.proportion_method,
            targets,
            cache: 0.0,
            initialisation_value: None,
            years: Vec::new(),
            values: Vec::new(),
        })
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    pub fn reset(&mut self) {
        self.cache = 0.0;
        self.initialisation_value = None;
        self.years.clear();
        self.values.clear();
    }

    fn calculate(&self, view: &View) -> f64 {
        self.targets
            .iter()
            .map(|target| {
                let cat = &view.partition.categories[target.category];
                let sel = view.selectivities.get(target.selectivity);
                match target.age_weight {
                    None => cat.biomass(|age| sel.age_result(age)),
                    Some(aw) => {
                        let aw = view.age_weights.get(aw);
                        cat.data
                            .iter()
                            .enumerate()
                            .map(|(i_age, n)| {
                                let age = cat.min_age + i_age as u32;
                                n * sel.age_result(age) * aw.mean_weight(age)
                            })
                            .sum()
                    }
                }
            })
            .sum()
    }

    /// Evaluate before the processes of the time step run.
    pub fn pre_execute(&mut self, view: &View) {
        self.cache = self.calculate(view);
    }

    /// Evaluate after the processes of the time step ran and record the blended value.
    pub fn execute(&mut self, year: u32, state: RunState, view: &View) {
        let pre = self.cache;
        let value = if self.proportion == 0.0 {
            pre
        } else {
            let post = self.calculate(view);
            match self.method {
                ProportionMethod::WeightedSum => pre + (post - pre) * self.proportion,
                ProportionMethod::WeightedProduct => {
                    pre.powf(1.0 - self.proportion) * post.powf(self.proportion)
                }
            }
        };
        match state {
            RunState::Initialise => self.initialisation_value = Some(value),
            RunState::Execute => {
                self.years.push(year);
                self.values.push(value);
            }
        }
    }

    pub fn report(&self) -> DerivedReport {
        DerivedReport {
            label: self.label.clone(),
            initialisation_value: self.initialisation_value,
            years: self.years.clone(),
            values: self.values.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::tests::base_toml;

    struct Model {
        cfg: Config,
        partition: Partition,
        selectivities: Selectivities,
        age_weights: AgeWeights,
    }

    impl Model {
        fn new(extra: &str) -> Self {
            let cfg = Config::from_toml(&(base_toml() + extra)).unwrap();
            let mut partition = Partition::new(&cfg);
            partition.categories[0].data = vec![10.0, 20.0, 30.0, 40.0, 50.0];
            Self {
                selectivities: Selectivities::new(&cfg),
                age_weights: AgeWeights::new(&cfg),
                partition,
                cfg,
            }
        }

        fn view(&self) -> View<'_> {
            View {
                partition: &self.partition,
                selectivities: &self.selectivities,
                age_weights: &self.age_weights,
            }
        }

        fn biomass(&self) -> Result<Biomass> {
            let time_steps: Vec<String> = self.cfg.time_steps.iter().map(|ts| ts.label.clone()).collect();
            Biomass::new(&self.cfg.derived_quantities[0], &time_steps, &self.view())
        }
    }

    const SSB: &str = r#"
[[selectivities]]
label = "mature"
type = "all_values"
values = [0.0, 0.0, 1.0, 1.0, 1.0]

[[derived_quantities]]
label = "ssb"
type = "biomass"
time_step = "step1"
categories = ["stock"]
selectivities = ["mature"]
"#;

    #[test]
    fn selected_biomass_is_recorded_by_year() {
        let mut model = Model::new(SSB);
        let mut ssb = model.biomass().unwrap();
        assert_eq!(ssb.time_step(), 0);

        ssb.pre_execute(&model.view());
        ssb.execute(2000, RunState::Initialise, &model.view());
        model.partition.categories[0].data[4] = 0.0;
        ssb.pre_execute(&model.view());
        ssb.execute(2000, RunState::Execute, &model.view());

        let report = ssb.report();
        assert_eq!(report.initialisation_value, Some(120.0));
        assert_eq!(report.years, vec![2000]);
        assert_eq!(report.values, vec![70.0]);

        ssb.reset();
        assert!(ssb.report().values.is_empty());
    }

    #[test]
    fn time_step_proportion_blends_before_and_after() {
        let mut model = Model::new(&(SSB.to_string() + "time_step_proportion = 0.5\n"));
        let mut ssb = model.biomass().unwrap();
        ssb.pre_execute(&model.view());
        model.partition.categories[0].data[4] = 0.0;
        ssb.execute(2000, RunState::Execute, &model.view());
        assert_eq!(ssb.report().values, vec![95.0]);

        let toml = SSB.to_string() + "time_step_proportion = 0.5\nproportion_method = \"weighted_product\"\n";
        let mut model = Model::new(&toml);
        let mut ssb = model.biomass().unwrap();
        ssb.pre_execute(&model.view());
        model.partition.categories[0].data[4] = 0.0;
        ssb.execute(2000, RunState::Execute, &model.view());
        assert!((ssb.report().values[0] - (120.0_f64 * 70.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn age_weights_replace_mean_weight() {
        let toml = SSB.to_string()
            + "age_weights = [\"heavy\"]\n\n[[age_weights]]\nlabel = \"heavy\"\nvalues = [2.0]\n";
        let model = Model::new(&toml);
        let mut ssb = model.biomass().unwrap();
        ssb.pre_execute(&model.view());
        ssb.execute(2000, RunState::Execute, &model.view());
        assert_eq!(ssb.report().values, vec![240.0]);
    }

    #[test]
    fn unknown_labels_fail_to_build() {
        let model = Model::new(&SSB.replace(r#"["mature"]"#, r#"["immature"]"#));
        assert!(model.biomass().is_err());
        let model = Model::new(&SSB.replace(r#"time_step = "step1""#, r#"time_step = "spawn""#));
        assert!(model.biomass().is_err());
    }
}
