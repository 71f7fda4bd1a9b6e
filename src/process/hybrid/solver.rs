use super::MortalityHybrid;
use super::ledger::{CategoryLedger, FisheryCategoryLink, FisheryLedger, Ledgers, RemovalsCache, TimeStepPlan};
use crate::config::SolverConstants;
use crate::partition::Partition;
use crate::penalty::Penalties;
use crate::process::{RunState, StepContext};

/// Fraction of a season survived, integrated over the season, at total mortality `z`.
pub(super) fn survivorship(z: f64, season: f64) -> f64 {
    if z.abs() < 1e-12 {
        season
    } else {
        -(-season * z).exp_m1() / z
    }
}

/// Logistic switch: 1 well below `knee`, 0 well above it.
pub(super) fn joiner(steepness: f64, value: f64, knee: f64) -> f64 {
    1.0 / (1.0 + (steepness * (value - knee)).exp())
}

#[derive(Clone, Copy)]
enum Decay {
    /// Half of the natural mortality of the step.
    HalfNatural,
    /// Survivorship at the current total mortality.
    Survivorship,
}

/// Records touched by one active (year, time step) solve.
struct Step<'a> {
    plan: &'a TimeStepPlan,
    categories: &'a mut [CategoryLedger],
    fisheries: &'a mut [FisheryLedger],
    links: &'a mut [FisheryCategoryLink],
    partition: &'a Partition,
    year: u32,
    season: f64,
}

impl MortalityHybrid {
    pub(super) fn solve(&mut self, ctx: &mut StepContext, partition: &mut Partition) {
        let Self {
            label,
            biomass,
            max_f,
            f_iterations,
            constants,
            ledgers,
            observed_totals,
            removals,
            ..
        } = self;
        let Ledgers {
            categories,
            fisheries,
            links,
            years,
            plans,
        } = ledgers;
        let plan = &plans[ctx.time_step];
        natural_mortality(categories, ctx, plan.season_length * plan.ratio);

        let active = ctx.state == RunState::Execute && plan.has_fishery();
        let year_idx = years.binary_search(&ctx.year).ok().filter(|_| active);
        if let Some(year_idx) = year_idx {
            let model_min_age = partition.min_age;
            let observed = observed_totals[year_idx][ctx.time_step];
            let mut step = Step {
                plan,
                categories: &mut categories[..],
                fisheries: &mut fisheries[..],
                links: &mut links[..],
                partition: &*partition,
                year: ctx.year,
                season: plan.season_length,
            };
            step.refresh(ctx, *biomass);
            step.vulnerability(Decay::HalfNatural);
            step.seed(constants);

            for i_iter in 0..*f_iterations {
                step.total_mortality();
                step.survivorship();
                let ratio = observed / (step.implied_catch() + constants.epsilon);
                step.rescale_mortality(ratio);
                step.survivorship();
                step.vulnerability(Decay::Survivorship);
                step.update_f(constants, *max_f);
                log::trace!(
                    "{label}: year {} iteration {i_iter}: catch ratio {ratio:.6}",
                    ctx.year
                );
            }

            step.total_mortality();
            step.survivorship();
            step.record(year_idx, removals, model_min_age);
            step.trigger_penalties(ctx.penalties);
        }

        apply(categories, partition);
    }
}

fn natural_mortality(categories: &mut [CategoryLedger], ctx: &StepContext, scale: f64) {
    for cat in categories {
        let sel = ctx.selectivities.get(cat.m_selectivity);
        for i_age in 0..cat.age_spread() {
            let m_sel = sel.age_result(cat.min_age + i_age as u32);
            let z = scale * cat.m * m_sel;
            cat.m_selectivity_values[i_age] = m_sel;
            cat.natural_z[i_age] = z;
            cat.z[i_age] = z;
            cat.half_m_decay[i_age] = (-0.5 * z).exp();
        }
    }
}

fn apply(categories: &[CategoryLedger], partition: &mut Partition) {
    for cat in categories {
        let numbers = &mut partition.categories[cat.category].data;
        for (n, z) in numbers.iter_mut().zip(&cat.z) {
            *n *= (-z).exp();
        }
    }
}

impl Step<'_> {
    fn refresh(&mut self, ctx: &StepContext, biomass: bool) {
        for &i_link in &self.plan.links {
            let link = &mut self.links[i_link];
            let min_age = self.categories[link.category].min_age;
            let sel = ctx.selectivities.get(link.selectivity);
            for (i_age, value) in link.selectivity_values.iter_mut().enumerate() {
                *value = sel.age_result(min_age + i_age as u32);
            }
        }

        for cat in self.categories.iter_mut() {
            let mean_weight = &self.partition.categories[cat.category].mean_weight;
            for (i_age, weight) in cat.catch_weight.iter_mut().enumerate() {
                *weight = match cat.age_weight {
                    Some(aw) => ctx.age_weights.get(aw).mean_weight(cat.min_age + i_age as u32),
                    None if biomass => mean_weight[i_age],
                    None => 1.0,
                };
            }
        }
    }

    /// Weighted selected numbers surviving into the catch, for one link.
    fn available(&self, i_link: usize, decay: Decay) -> f64 {
        let link = &self.links[i_link];
        let cat = &self.categories[link.category];
        let numbers = &self.partition.categories[cat.category].data;
        let decay = match decay {
            Decay::HalfNatural => &cat.half_m_decay,
            Decay::Survivorship => &cat.survivorship,
        };
        numbers
            .iter()
            .zip(&cat.catch_weight)
            .zip(&link.selectivity_values)
            .zip(decay)
            .map(|(((n, w), sel), d)| n * w * sel * d)
            .sum()
    }

    fn vulnerability(&mut self, decay: Decay) {
        for &i_fish in &self.plan.fisheries {
            self.fisheries[i_fish].vulnerability = 0.0;
        }
        for &i_link in &self.plan.links {
            let available = self.available(i_link, decay);
            self.fisheries[self.links[i_link].fishery].vulnerability += available;
        }
    }

    /// Initial F from a buffered Pope's harvest rate.
    fn seed(&mut self, consts: &SolverConstants) {
        for &i_fish in &self.plan.fisheries {
            let fishery = &mut self.fisheries[i_fish];
            let catch = fishery.catch(self.year);
            if catch <= 0.0 {
                fishery.f = 0.0;
                continue;
            }
            let rate = catch / (fishery.vulnerability + consts.pope_catch_buffer * catch);
            let j = joiner(consts.joiner_steepness, rate, consts.joiner_knee);
            let u = j * rate + (1.0 - j) * consts.joiner_knee;
            fishery.f = -(-u).ln_1p() / self.season;
            log::trace!("{}: seed rate {rate:.6} joiner {j:.6} F {:.6}", fishery.label, fishery.f);
        }
    }

    fn total_mortality(&mut self) {
        for cat in self.categories.iter_mut() {
            cat.z.copy_from_slice(&cat.natural_z);
        }
        for &i_link in &self.plan.links {
            let link = &self.links[i_link];
            let f = self.fisheries[link.fishery].f;
            let cat = &mut self.categories[link.category];
            for (z, sel) in cat.z.iter_mut().zip(&link.selectivity_values) {
                *z += f * sel;
            }
        }
    }

    fn survivorship(&mut self) {
        for cat in self.categories.iter_mut() {
            for (s, &z) in cat.survivorship.iter_mut().zip(&cat.z) {
                *s = survivorship(z, self.season);
            }
        }
    }

    fn link_catch(&self, i_link: usize) -> f64 {
        self.fisheries[self.links[i_link].fishery].f * self.available(i_link, Decay::Survivorship)
    }

    fn implied_catch(&self) -> f64 {
        self.plan.links.iter().map(|&i_link| self.link_catch(i_link)).sum()
    }

    /// Scale the fishing part of Z so the implied catch matches the observed total.
    fn rescale_mortality(&mut self, ratio: f64) {
        for cat in self.categories.iter_mut() {
            for (z, &nat) in cat.z.iter_mut().zip(&cat.natural_z) {
                *z = nat + ratio * (*z - nat);
            }
        }
    }

    fn update_f(&mut self, consts: &SolverConstants, max_f: f64) {
        for &i_fish in &self.plan.fisheries {
            let fishery = &mut self.fisheries[i_fish];
            let catch = fishery.catch(self.year);
            if catch <= 0.0 {
                fishery.f = 0.0;
                continue;
            }
            let rate = catch / (fishery.vulnerability + consts.epsilon);
            let j = joiner(consts.joiner_steepness, rate, consts.joiner_knee * max_f);
            fishery.f = j * rate + (1.0 - j) * max_f;
            log::trace!("{}: rate {rate:.6} joiner {j:.6} F {:.6}", fishery.label, fishery.f);
        }
    }

    fn record(&mut self, year_idx: usize, removals: &mut RemovalsCache, model_min_age: u32) {
        for &i_fish in &self.plan.fisheries {
            let actual: f64 = self
                .plan
                .links
                .iter()
                .filter(|&&i_link| self.links[i_link].fishery == i_fish)
                .map(|&i_link| self.link_catch(i_link))
                .sum();
            let fishery = &mut self.fisheries[i_fish];
            fishery.actual_catches.insert(self.year, actual);
            fishery.f_by_year.insert(self.year, fishery.f);
        }

        for &i_link in &self.plan.links {
            let link = &self.links[i_link];
            let cat = &self.categories[link.category];
            let f = self.fisheries[link.fishery].f;
            let numbers = &self.partition.categories[cat.category].data;
            let offset = (cat.min_age - model_min_age) as usize;

            let row = removals.row_mut(year_idx, link.fishery, link.category);
            row.fill(0.0);
            let at_age = numbers
                .iter()
                .zip(&link.selectivity_values)
                .zip(&cat.survivorship)
                .map(|((n, sel), s)| f * n * sel * s);
            for (cell, value) in row[offset..].iter_mut().zip(at_age) {
                *cell = value;
            }
        }
    }

    fn trigger_penalties(&self, penalties: &mut Penalties) {
        for &i_fish in &self.plan.fisheries {
            let fishery = &self.fisheries[i_fish];
            if let Some(penalty) = fishery.penalty {
                let actual = fishery.actual_catches.get(&self.year).copied().unwrap_or(0.0);
                penalties.trigger(penalty, &fishery.label, fishery.catch(self.year), actual);
            }
        }
    }
}
