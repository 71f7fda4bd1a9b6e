use super::{BuildContext, BuildError, Process, StepContext};
use crate::partition::Partition;
use anyhow::{Result, bail};

/// Adds a constant number of recruits, split between categories by fixed proportions.
pub struct RecruitmentConstant {
    label: String,
    r0: f64,
    /// (category index, age index within the category, proportion)
    targets: Vec<(usize, usize, f64)>,
}

impl RecruitmentConstant {
    pub fn new(
        label: &str,
        categories: &[String],
        proportions: &[f64],
        r0: f64,
        age: Option<u32>,
        ctx: &BuildContext,
    ) -> Result<Self, BuildError> {
        if proportions.len() != categories.len() {
            return Err(BuildError::CountMismatch {
                what: "recruitment proportions",
                expected: categories.len(),
                found: proportions.len(),
            });
        }
        let age = age.unwrap_or(ctx.partition.min_age);
        let mut targets = Vec::with_capacity(categories.len());
        for (label, &proportion) in categories.iter().zip(proportions) {
            let i_cat = ctx.category(label)?;
            let cat = &ctx.partition.categories[i_cat];
            if !(cat.min_age..=cat.max_age).contains(&age) {
                return Err(BuildError::AgeOutOfRange {
                    category: label.clone(),
                    age,
                });
            }
            targets.push((i_cat, (age - cat.min_age) as usize, proportion));
        }
        Ok(Self {
            label: label.to_string(),
            r0,
            targets,
        })
    }
}

impl Process for RecruitmentConstant {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, _ctx: &mut StepContext, partition: &mut Partition) {
        for &(i_cat, i_age, proportion) in &self.targets {
            partition.categories[i_cat].data[i_age] += self.r0 * proportion;
        }
    }

    fn set_parameter(&mut self, name: &str, key: Option<&str>, value: f64) -> Result<()> {
        match (name, key) {
            ("r0", None) => self.r0 = value,
            _ => bail!("process {} has no addressable parameter {name}", self.label),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::base_toml;
    use crate::process::RunState;
    use crate::process::tests::Fixture;

    #[test]
    fn recruits_are_added_at_the_recruitment_age() {
        let mut fix = Fixture::new(&base_toml());
        let ctx = fix.ctx("recruitment");
        let mut rec =
            RecruitmentConstant::new("recruitment", &["stock".into()], &[1.0], 500.0, Some(2), &ctx)
                .unwrap();
        let mut partition = fix.partition.clone();

        rec.execute(&mut fix.step(2000, 0, RunState::Execute), &mut partition);
        rec.set_parameter("r0", None, 100.0).unwrap();
        rec.execute(&mut fix.step(2001, 0, RunState::Execute), &mut partition);

        assert_eq!(partition.categories[0].data, vec![0.0, 600.0, 0.0, 0.0, 0.0]);
        assert!(rec.set_parameter("m", None, 0.1).is_err());
    }

    #[test]
    fn recruitment_age_must_be_in_the_category() {
        let fix = Fixture::new(&base_toml());
        let res = RecruitmentConstant::new(
            "recruitment",
            &["stock".into()],
            &[1.0],
            500.0,
            Some(9),
            &fix.ctx("recruitment"),
        );
        assert!(matches!(res, Err(BuildError::AgeOutOfRange { age: 9, .. })));
    }
}
