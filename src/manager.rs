//! Run directories and the commands acting on them.

use crate::analysis::Analyzer;
use crate::config::{Config, Scenario};
use crate::engine::Engine;
use crate::weather::WeatherSeries;
use anyhow::{Context, Result, bail};
use glob::glob;
use rmp_serde::encode;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Hot and dry weather used by forced outbreaks without a weather file.
const FORCED_TEMP: f64 = 29.0;
const FORCED_HUM: f64 = 55.0;

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn create_run(&self) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let weather = self.load_weather().context("failed to load weather")?;
        let mut engine = Engine::generate_initial_condition(self.cfg.clone(), weather)
            .context("failed to generate initial condition")?;
        if self.cfg.weather.extrapolate {
            engine.extend_weather(self.cfg.weather.n_days);
        }
        log::info!(
            "run {run_idx} uses seed {} with {} weather days",
            engine.seed(),
            engine.weather().len()
        );

        self.simulate(run_idx, 0, engine)
    }

    pub fn resume_run(&self, run_idx: usize) -> Result<()> {
        let file_idx = self
            .count_trajectory_files(run_idx)
            .context("failed to count trajectory files")?;

        let engine = self.load_engine(run_idx)?;

        self.simulate(run_idx, file_idx, engine)
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let mut analyzer = Analyzer::new();

            let n_files = self
                .count_trajectory_files(run_idx)
                .context("failed to count trajectory files")?;
            for file_idx in 0..n_files {
                analyzer
                    .add_file(self.trajectory_file(run_idx, file_idx))
                    .context("failed to add file")?;
            }

            for (name, report) in analyzer.reports() {
                log::info!("run {run_idx} {name}: {report:?}");
            }

            analyzer
                .save_results(self.results_file(run_idx))
                .context("failed to save results")?;
            log::info!("analyzed {} days of run {run_idx}", analyzer.n_records());
        }

        Ok(())
    }

    /// Compare the last safe state of a run with its current state.
    pub fn compare_run(&self, run_idx: usize) -> Result<()> {
        let engine = self.load_engine(run_idx)?;

        let Some(report) = engine.compare().context("failed to compare snapshots")? else {
            bail!("run {run_idx} has no safe state");
        };
        log::info!(
            "day {} vs safe day {}: population {:+}, yield loss {:+.2}%, viral risk {:+.4}, {} cells changed",
            report.current_day,
            report.baseline_day,
            report.population_count,
            report.yield_loss_pct,
            report.viral_risk_index,
            report.cells.len()
        );
        if report.is_zero() {
            log::info!("run {run_idx} has not changed since its safe state");
        }

        let file = self.comparison_file(run_idx);
        let file = File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, &report).context("failed to serialize comparison")?;
        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Store the current state of a run as its last safe state.
    pub fn capture_run(&self, run_idx: usize) -> Result<()> {
        let mut engine = self.load_engine(run_idx)?;
        if let Some(safe) = engine.last_safe_snapshot() {
            log::info!("replacing safe state of day {}", safe.state.day);
        }
        engine.capture_safe_state();

        let checkpoint_file = self.checkpoint_file(run_idx);
        engine
            .save_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to save {checkpoint_file:?}"))?;
        Ok(())
    }

    /// Print the telemetry of a run for the advisory generator.
    pub fn report_run(&self, run_idx: usize) -> Result<()> {
        let engine = self.load_engine(run_idx)?;
        let world = engine.world();
        let n_lost = world.grid.cells().filter(|cell| cell.total_loss()).count();
        log::info!(
            "run {run_idx} has {} live agents of {} spawned, {n_lost} cells lost",
            world.population.n_live(),
            world.population.n_slots()
        );
        let telemetry = toml::to_string(&engine.telemetry()).context("failed to encode telemetry")?;
        print!("{telemetry}");
        Ok(())
    }

    /// Rewind a run to day 0, discarding its trajectories.
    pub fn reset_run(&self, run_idx: usize) -> Result<()> {
        let mut engine = self.load_engine(run_idx)?;
        engine.reset();

        for file in self.glob_paths(self.run_dir(run_idx).join("trajectory-*.msgpack"))? {
            fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
        }

        let checkpoint_file = self.checkpoint_file(run_idx);
        engine
            .save_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to save {checkpoint_file:?}"))?;
        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.glob_paths(self.sim_dir.join("run-*"))? {
            if run_dir.is_dir() {
                fs::remove_dir_all(&run_dir)
                    .with_context(|| format!("failed to remove {run_dir:?}"))?;
                log::info!("removed {run_dir:?}");
            }
        }
        Ok(())
    }

    fn simulate(&self, run_idx: usize, file_idx: usize, mut engine: Engine) -> Result<()> {
        let n_days = engine
            .perform_simulation(self.trajectory_file(run_idx, file_idx))
            .context("failed to perform simulation")?;
        log::info!("simulated {n_days} days, run {run_idx} is at day {}", engine.day());

        engine
            .save_checkpoint(self.checkpoint_file(run_idx))
            .context("failed to save checkpoint")?;

        Ok(())
    }

    fn load_engine(&self, run_idx: usize) -> Result<Engine> {
        let checkpoint_file = self.checkpoint_file(run_idx);
        let engine = Engine::load_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to load {checkpoint_file:?}"))?;
        if engine.cfg() != &self.cfg {
            bail!("checkpoint config differs from the current config");
        }
        log::info!("loaded {checkpoint_file:?}");
        Ok(engine)
    }

    fn load_weather(&self) -> Result<WeatherSeries> {
        let weather = match &self.cfg.weather.file {
            Some(file) => WeatherSeries::from_file(self.sim_dir.join(file))?,
            None if self.cfg.scenario()? == Scenario::ForcedOutbreak => {
                WeatherSeries::constant(self.cfg.weather.n_days, FORCED_TEMP, FORCED_HUM)
            }
            None => WeatherSeries::default(),
        };
        if weather.is_empty() && !self.cfg.weather.extrapolate {
            log::warn!("no weather data and extrapolation disabled");
        }
        log::info!("loaded {} weather days", weather.len());
        Ok(weather)
    }

    fn glob_paths(&self, pattern: PathBuf) -> Result<Vec<PathBuf>> {
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let paths = glob(pattern)
            .context("failed to glob paths")?
            .filter_map(Result::ok)
            .collect();
        Ok(paths)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let paths = self.glob_paths(self.sim_dir.join("run-*"))?;
        Ok(paths.iter().filter(|p| p.is_dir()).count())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn count_trajectory_files(&self, run_idx: usize) -> Result<usize> {
        let paths = self.glob_paths(self.run_dir(run_idx).join("trajectory-*.msgpack"))?;
        Ok(paths.len())
    }

    fn checkpoint_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("checkpoint.msgpack")
    }

    fn trajectory_file(&self, run_idx: usize, file_idx: usize) -> PathBuf {
        self.run_dir(run_idx)
            .join(format!("trajectory-{file_idx:04}.msgpack"))
    }

    fn results_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("results.msgpack")
    }

    fn comparison_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("comparison.msgpack")
    }
}
