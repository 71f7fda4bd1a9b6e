use super::ledger::{CategoryLedger, FisheryCategoryLink, FisheryLedger, Ledgers, TimeStepPlan};
use crate::config::{HybridConfig, broadcast};
use crate::process::{BuildContext, BuildError, check_count};
use crate::table::Table;
use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;

const CATCHES: &str = "catches";
const METHOD: &str = "method";
const NONE: &str = "none";

/// Observed catch series keyed by fishery label.
struct Catches {
    years: Vec<u32>,
    by_fishery: BTreeMap<String, BTreeMap<u32, f64>>,
}

/// One row of the method table.
struct MethodRow {
    fishery: String,
    categories: Vec<String>,
    selectivities: Vec<String>,
    age_weights: Option<Vec<String>>,
    time_step: String,
    penalty: String,
    season_length: f64,
}

/// Turn the process configuration into ledgers, checking every consistency rule.
pub(super) fn build_ledgers(cfg: &HybridConfig, ctx: &BuildContext) -> Result<Ledgers, BuildError> {
    let model = &ctx.cfg.model;
    let Catches {
        years,
        mut by_fishery,
    } = parse_catches(&cfg.catches, model.start_year..=model.final_year)?;
    let rows = parse_method(&cfg.method, cfg.biomass)?;

    let mut ledgers = Ledgers {
        categories: category_ledgers(cfg, ctx)?,
        fisheries: Vec::new(),
        links: Vec::new(),
        years,
        plans: Vec::new(),
    };
    let mut assigned: Vec<Option<Option<String>>> = vec![None; ledgers.categories.len()];
    for row in rows {
        let i_fish = fishery_ledger(&mut ledgers, &row, &mut by_fishery, ctx)?;
        link_categories(&mut ledgers, &mut assigned, &row, i_fish, ctx)?;
    }
    for label in by_fishery.keys() {
        log::warn!("catches column {label} is not used by any method");
    }

    ledgers.plans = time_step_plans(&ledgers, &cfg.time_step_proportions, ctx)?;
    Ok(ledgers)
}

fn column(table: &Table, name: &'static str, column: &str) -> Result<usize, BuildError> {
    table.column(column).ok_or_else(|| BuildError::MissingColumn {
        table: name,
        column: column.to_string(),
    })
}

fn check_table(table: &Table, name: &'static str) -> Result<(), BuildError> {
    table.check_shape().map_err(|err| BuildError::BadTable {
        table: name,
        reason: format!("{err:#}"),
    })?;
    let mut seen = HashSet::new();
    for col in &table.columns {
        if !seen.insert(col.as_str()) {
            return Err(BuildError::BadTable {
                table: name,
                reason: format!("column {col} appears more than once"),
            });
        }
    }
    Ok(())
}

fn bad_cell(table: &'static str, row: usize, err: anyhow::Error) -> BuildError {
    BuildError::BadCell {
        table,
        row,
        reason: format!("{err:#}"),
    }
}

fn parse_catches(table: &Table, model_years: RangeInclusive<u32>) -> Result<Catches, BuildError> {
    check_table(table, CATCHES)?;
    let i_year = column(table, CATCHES, "year")?;

    let mut by_fishery: BTreeMap<String, BTreeMap<u32, f64>> = table
        .columns
        .iter()
        .enumerate()
        .filter(|&(i_col, _)| i_col != i_year)
        .map(|(_, label)| (label.clone(), BTreeMap::new()))
        .collect();
    let mut years = Vec::with_capacity(table.rows.len());

    for (i_row, row) in table.rows.iter().enumerate() {
        let year = row[i_year].as_year().map_err(|err| bad_cell(CATCHES, i_row, err))?;
        if !model_years.contains(&year) {
            return Err(BuildError::YearOutOfRange(year));
        }
        if years.contains(&year) {
            return Err(BuildError::DuplicateYear(year));
        }
        years.push(year);

        for (i_col, cell) in row.iter().enumerate().filter(|&(i_col, _)| i_col != i_year) {
            let catch = cell.as_f64().map_err(|err| bad_cell(CATCHES, i_row, err))?;
            if catch < 0.0 {
                return Err(BuildError::BadCell {
                    table: CATCHES,
                    row: i_row,
                    reason: format!("catch {catch} is negative"),
                });
            }
            if let Some(series) = by_fishery.get_mut(&table.columns[i_col]) {
                series.insert(year, catch);
            }
        }
    }
    years.sort_unstable();

    Ok(Catches { years, by_fishery })
}

fn parse_method(table: &Table, biomass: bool) -> Result<Vec<MethodRow>, BuildError> {
    check_table(table, METHOD)?;
    let i_method = column(table, METHOD, "method")?;
    let i_category = column(table, METHOD, "category")?;
    let i_selectivity = column(table, METHOD, "selectivity")?;
    let i_time_step = column(table, METHOD, "time_step")?;
    let i_penalty = column(table, METHOD, "penalty")?;
    let i_duration = column(table, METHOD, "annual_duration")?;
    let i_age_weight = table.column("age_weight_label");
    if i_age_weight.is_some() && !biomass {
        return Err(BuildError::AgeWeightWithNumbers);
    }

    table
        .rows
        .iter()
        .enumerate()
        .map(|(i_row, row)| {
            let fishery = row[i_method].as_text();
            let categories = row[i_category].as_list();
            let selectivities = row[i_selectivity].as_list();
            if selectivities.len() != categories.len() {
                return Err(BuildError::CountMismatch {
                    what: "selectivities in a method row",
                    expected: categories.len(),
                    found: selectivities.len(),
                });
            }
            let age_weights = i_age_weight.map(|i_col| row[i_col].as_list());
            if let Some(age_weights) = &age_weights {
                if age_weights.len() != categories.len() {
                    return Err(BuildError::CountMismatch {
                        what: "age weights in a method row",
                        expected: categories.len(),
                        found: age_weights.len(),
                    });
                }
            }
            let season_length = row[i_duration]
                .as_f64()
                .map_err(|err| bad_cell(METHOD, i_row, err))?;
            if !(season_length > 0.0 && season_length <= 1.0) {
                return Err(BuildError::SeasonLengthOutOfRange {
                    fishery,
                    value: season_length,
                });
            }
            Ok(MethodRow {
                fishery,
                categories,
                selectivities,
                age_weights,
                time_step: row[i_time_step].as_text(),
                penalty: row[i_penalty].as_text(),
                season_length,
            })
        })
        .collect()
}

fn category_ledgers(cfg: &HybridConfig, ctx: &BuildContext) -> Result<Vec<CategoryLedger>, BuildError> {
    let n_cats = cfg.categories.len();
    check_count("natural mortality rates", cfg.m.len(), n_cats)?;
    check_count("M-by-age ogives", cfg.relative_m_by_age.len(), n_cats)?;
    let m = broadcast(&cfg.m, n_cats);
    let m_selectivities = broadcast(&cfg.relative_m_by_age, n_cats);

    cfg.categories
        .iter()
        .zip(m)
        .zip(&m_selectivities)
        .map(|((label, m), sel)| {
            let i_cat = ctx.category(label)?;
            let cat = &ctx.partition.categories[i_cat];
            Ok(CategoryLedger::new(
                label,
                i_cat,
                cat.min_age,
                cat.age_spread(),
                m,
                sel,
                ctx.selectivity(sel)?,
            ))
        })
        .collect()
}

/// Find or create the fishery of a method row.
fn fishery_ledger(
    ledgers: &mut Ledgers,
    row: &MethodRow,
    by_fishery: &mut BTreeMap<String, BTreeMap<u32, f64>>,
    ctx: &BuildContext,
) -> Result<usize, BuildError> {
    if let Some(i_fish) = ledgers.fishery_index(&row.fishery) {
        let fishery = &ledgers.fisheries[i_fish];
        if fishery.time_step_label != row.time_step {
            return Err(BuildError::FisheryInMultipleTimeSteps {
                fishery: row.fishery.clone(),
                first: fishery.time_step_label.clone(),
                second: row.time_step.clone(),
            });
        }
        if fishery.season_length != row.season_length {
            return Err(BuildError::InconsistentSeasonLength {
                fishery: row.fishery.clone(),
                first: fishery.season_length,
                second: row.season_length,
            });
        }
        return Ok(i_fish);
    }

    let time_step = ctx.time_step(&row.time_step)?;
    if !ctx.attached.contains(&time_step) {
        return Err(BuildError::DetachedTimeStep {
            fishery: row.fishery.clone(),
            time_step: row.time_step.clone(),
        });
    }
    let (penalty_label, penalty) = if row.penalty == NONE {
        (None, None)
    } else {
        let idx = ctx
            .penalties
            .index(&row.penalty)
            .ok_or_else(|| BuildError::UnknownPenalty(row.penalty.clone()))?;
        (Some(row.penalty.clone()), Some(idx))
    };
    let catches = by_fishery
        .remove(&row.fishery)
        .ok_or_else(|| BuildError::MissingCatches(row.fishery.clone()))?;
    if row.season_length < 1.0 {
        log::warn!(
            "fishery {} takes its catch over {} of the year",
            row.fishery,
            row.season_length
        );
    }

    ledgers.fisheries.push(FisheryLedger {
        label: row.fishery.clone(),
        time_step_label: row.time_step.clone(),
        time_step,
        season_length: row.season_length,
        penalty_label,
        penalty,
        catches,
        actual_catches: BTreeMap::new(),
        f_by_year: BTreeMap::new(),
        vulnerability: 0.0,
        f: 0.0,
    });
    Ok(ledgers.fisheries.len() - 1)
}

fn link_categories(
    ledgers: &mut Ledgers,
    assigned: &mut [Option<Option<String>>],
    row: &MethodRow,
    i_fish: usize,
    ctx: &BuildContext,
) -> Result<(), BuildError> {
    for (i_entry, (label, sel)) in row.categories.iter().zip(&row.selectivities).enumerate() {
        ctx.category(label)?;
        let i_cat = ledgers
            .category_index(label)
            .ok_or_else(|| BuildError::CategoryNotInProcess(label.clone()))?;
        if ledgers
            .links
            .iter()
            .any(|link| link.fishery == i_fish && link.category == i_cat)
        {
            return Err(BuildError::DuplicateLink {
                fishery: row.fishery.clone(),
                category: label.clone(),
            });
        }

        let age_weight = row
            .age_weights
            .as_ref()
            .map(|labels| labels[i_entry].clone())
            .filter(|label| label != NONE);
        match &assigned[i_cat] {
            Some(first) if *first != age_weight => {
                return Err(BuildError::ConflictingAgeWeight {
                    category: label.clone(),
                    first: first.clone().unwrap_or_else(|| NONE.to_string()),
                    second: age_weight.unwrap_or_else(|| NONE.to_string()),
                });
            }
            Some(_) => {}
            None => {
                let cat = &mut ledgers.categories[i_cat];
                cat.age_weight = match &age_weight {
                    Some(aw) => Some(
                        ctx.age_weights
                            .index(aw)
                            .ok_or_else(|| BuildError::UnknownAgeWeight(aw.clone()))?,
                    ),
                    None => None,
                };
                cat.age_weight_label = age_weight.clone();
                assigned[i_cat] = Some(age_weight);
            }
        }

        let spread = ledgers.categories[i_cat].age_spread();
        ledgers.links.push(FisheryCategoryLink {
            fishery: i_fish,
            category: i_cat,
            selectivity_label: sel.clone(),
            selectivity: ctx.selectivity(sel)?,
            selectivity_values: vec![0.0; spread],
        });
    }
    Ok(())
}

fn time_step_plans(
    ledgers: &Ledgers,
    proportions: &[f64],
    ctx: &BuildContext,
) -> Result<Vec<TimeStepPlan>, BuildError> {
    let ratios = ctx.time_step_ratios(proportions)?;
    ratios
        .into_iter()
        .enumerate()
        .map(|(i_ts, ratio)| {
            let fisheries: Vec<usize> = (0..ledgers.fisheries.len())
                .filter(|&i_fish| ledgers.fisheries[i_fish].time_step == i_ts)
                .collect();

            // Steps without a fishery take natural mortality over the whole year.
            let mut season_length = 1.0;
            if let Some((&first, rest)) = fisheries.split_first() {
                let first = &ledgers.fisheries[first];
                season_length = first.season_length;
                if let Some(other) = rest
                    .iter()
                    .map(|&i_fish| &ledgers.fisheries[i_fish])
                    .find(|other| other.season_length != season_length)
                {
                    return Err(BuildError::SeasonLengthMismatch {
                        time_step: ctx.time_steps[i_ts].clone(),
                        first: first.label.clone(),
                        second: other.label.clone(),
                    });
                }
            }

            let links = ledgers
                .links
                .iter()
                .enumerate()
                .filter(|(_, link)| fisheries.contains(&link.fishery))
                .map(|(i_link, _)| i_link)
                .collect();

            Ok(TimeStepPlan {
                ratio,
                season_length,
                fisheries,
                links,
            })
        })
        .collect()
}
