use crate::config::Config;
use crate::engine::Engine;
use crate::report::Report;
use anyhow::{Context, Result};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg = Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::debug!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Run the model into a new run directory, after applying parameter overrides.
    pub fn run_model(&self, overrides: &[(String, f64)]) -> Result<()> {
        let mut engine = Engine::new(self.cfg.clone()).context("failed to construct engine")?;
        for (path, value) in overrides {
            engine
                .set_parameter(path, *value)
                .with_context(|| format!("failed to override {path}"))?;
            log::info!("set {path} = {value}");
        }

        let report = engine.run().context("failed to run model")?;

        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;
        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let report_file = self.report_file(run_idx);
        report
            .save(&report_file)
            .with_context(|| format!("failed to save {report_file:?}"))?;
        log::info!("saved {report_file:?} (penalty total {:.6})", report.penalty_total);

        Ok(())
    }

    pub fn summarize_run(&self, run_idx: usize) -> Result<()> {
        let report_file = self.report_file(run_idx);
        let report =
            Report::load(&report_file).with_context(|| format!("failed to load {report_file:?}"))?;
        report.log_summary();
        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let run_dir = self.run_dir(run_idx);
            fs::remove_dir_all(&run_dir).with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }
        Ok(())
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .count();
        Ok(count)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn report_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("report.msgpack")
    }
}
