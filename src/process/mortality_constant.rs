use super::{BuildContext, BuildError, Process, StepContext, check_count};
use crate::config::broadcast;
use crate::partition::Partition;
use anyhow::{Result, bail};

struct Target {
    label: String,
    category: usize,
    m: f64,
    m_selectivity: usize,
}

/// Natural mortality at a constant annual rate, split across time steps.
pub struct MortalityConstantRate {
    label: String,
    targets: Vec<Target>,
    ratios: Vec<f64>,
    selectivity_labels: Vec<String>,
}

impl MortalityConstantRate {
    pub fn new(
        label: &str,
        categories: &[String],
        m: &[f64],
        relative_m_by_age: &[String],
        time_step_proportions: &[f64],
        ctx: &BuildContext,
    ) -> Result<Self, BuildError> {
        check_count("natural mortality rates", m.len(), categories.len())?;
        check_count("M-by-age ogives", relative_m_by_age.len(), categories.len())?;
        let m = broadcast(m, categories.len());
        let selectivity_labels = broadcast(relative_m_by_age, categories.len());

        let targets = categories
            .iter()
            .zip(m)
            .zip(&selectivity_labels)
            .map(|((label, m), sel)| {
                Ok(Target {
                    label: label.clone(),
                    category: ctx.category(label)?,
                    m,
                    m_selectivity: ctx.selectivity(sel)?,
                })
            })
            .collect::<Result<_, BuildError>>()?;

        Ok(Self {
            label: label.to_string(),
            targets,
            ratios: ctx.time_step_ratios(time_step_proportions)?,
            selectivity_labels,
        })
    }
}

impl Process for MortalityConstantRate {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut StepContext, partition: &mut Partition) {
        let ratio = self.ratios[ctx.time_step];
        for target in &self.targets {
            let sel = ctx.selectivities.get(target.m_selectivity);
            let cat = &mut partition.categories[target.category];
            let min_age = cat.min_age;
            for (i_age, n) in cat.data.iter_mut().enumerate() {
                *n *= (-target.m * ratio * sel.age_result(min_age + i_age as u32)).exp();
            }
        }
    }

    fn set_parameter(&mut self, name: &str, key: Option<&str>, value: f64) -> Result<()> {
        let target = match (name, key) {
            ("m", Some(key)) => self.targets.iter_mut().find(|target| target.label == key),
            _ => None,
        };
        let Some(target) = target else {
            bail!("process {} has no addressable parameter {name}", self.label);
        };
        target.m = value;
        Ok(())
    }

    fn selectivity_labels(&self) -> Vec<String> {
        self.selectivity_labels.clone()
    }
}
