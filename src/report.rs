use crate::partition::Partition;
use crate::penalty::PenaltyScore;
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Values of one derived quantity over the model years.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DerivedReport {
    pub label: String,
    /// Value at the end of the initialisation cycles.
    pub initialisation_value: Option<f64>,
    pub years: Vec<u32>,
    pub values: Vec<f64>,
}

/// Observed and achieved catch of one fishery over its years with catches.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FisheryReport {
    pub label: String,
    pub years: Vec<u32>,
    pub catch: Vec<f64>,
    pub actual_catch: Vec<f64>,
    pub f: Vec<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub label: String,
    pub fisheries: Vec<FisheryReport>,
}

/// Results of one model run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Report {
    pub years: Vec<u32>,
    pub derived: Vec<DerivedReport>,
    pub processes: Vec<ProcessReport>,
    pub penalties: Vec<PenaltyScore>,
    pub penalty_total: f64,
    /// Partition at the end of the final year.
    pub partition: Partition,
}

impl Report {
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize report")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let report = decode::from_read(&mut reader).context("failed to deserialize report")?;
        Ok(report)
    }

    pub fn derived(&self, label: &str) -> Option<&DerivedReport> {
        self.derived.iter().find(|dq| dq.label == label)
    }

    pub fn fishery(&self, process: &str, fishery: &str) -> Option<&FisheryReport> {
        self.processes
            .iter()
            .find(|proc| proc.label == process)?
            .fisheries
            .iter()
            .find(|fish| fish.label == fishery)
    }

    /// Write the derived quantities and fishery tables to the log.
    pub fn log_summary(&self) {
        for dq in &self.derived {
            log::info!("derived quantity {}", dq.label);
            if let Some(value) = dq.initialisation_value {
                log::info!("  initialisation {value:12.4}");
            }
            for (year, value) in dq.years.iter().zip(&dq.values) {
                log::info!("  {year} {value:12.4}");
            }
        }
        for proc in &self.processes {
            for fish in &proc.fisheries {
                log::info!("process {} fishery {}", proc.label, fish.label);
                log::info!("  year        catch       actual            F");
                for i_year in 0..fish.years.len() {
                    log::info!(
                        "  {} {:12.4} {:12.4} {:12.6}",
                        fish.years[i_year],
                        fish.catch[i_year],
                        fish.actual_catch[i_year],
                        fish.f[i_year]
                    );
                }
            }
        }
        log::info!("penalty total {:.6}", self.penalty_total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        Report {
            years: vec![2000, 2001],
            derived: vec![DerivedReport {
                label: "ssb".into(),
                initialisation_value: Some(12.0),
                years: vec![2000, 2001],
                values: vec![10.0, 9.0],
            }],
            processes: vec![ProcessReport {
                label: "mortality".into(),
                fisheries: vec![FisheryReport {
                    label: "FishA".into(),
                    years: vec![2001],
                    catch: vec![1.0],
                    actual_catch: vec![0.9],
                    f: vec![0.1],
                }],
            }],
            penalties: Vec::new(),
            penalty_total: 0.0,
            partition: Partition {
                min_age: 1,
                max_age: 1,
                plus_group: true,
                categories: Vec::new(),
            },
        }
    }

    #[test]
    fn lookups_find_labels() {
        let report = report();
        assert_eq!(report.derived("ssb").unwrap().values, vec![10.0, 9.0]);
        assert!(report.derived("b0").is_none());
        assert_eq!(report.fishery("mortality", "FishA").unwrap().f, vec![0.1]);
        assert!(report.fishery("mortality", "FishB").is_none());
        assert!(report.fishery("other", "FishA").is_none());
    }

    #[test]
    fn report_survives_a_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("popdyn-report-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("report.msgpack");

        let report = report();
        report.save(&file).unwrap();
        assert_eq!(Report::load(&file).unwrap(), report);

        std::fs::remove_dir_all(&dir).ok();
    }
}
