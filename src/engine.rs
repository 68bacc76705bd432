//! Daily step engine and simulation checkpoints.

use crate::config::{Config, InitConfig, MovementConfig, Scenario};
use crate::error::SimError;
use crate::grid::{CellInfo, CropType, Grid};
use crate::metrics::{self, DeltaReport, SimulationState, Snapshot, Telemetry};
use crate::model::{PestAgent, PestState, Population};
use crate::weather::{WeatherSample, WeatherSeries};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Binomial, weighted::WeightedIndex};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Minimum seeding weight of a cell, reached at the field centre.
const SPAWN_FLOOR: f64 = 0.1;

/// Offset separating the weather stream from the simulation stream.
const WEATHER_SEED_OFFSET: u64 = 0x9E37_79B9_7F4A_7C15;

/// Mutable part of a simulation: everything a day step may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// Number of days simulated so far.
    pub day: usize,
    /// Consecutive days with the breeding gate open.
    pub streak: usize,
    pub outbreak: bool,
    /// Weather of the last simulated day.
    pub weather: Option<WeatherSample>,
    pub grid: Grid,
    pub population: Population,
    pub rng: ChaCha12Rng,
}

/// One entry of a trajectory file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    pub state: SimulationState,
    /// Full snapshot, stored every `snapshot_every` days.
    pub snapshot: Option<Snapshot>,
}

/// Simulation engine.
///
/// Owns the configuration, the weather series, the world and the last safe
/// state, and provides methods to step, run, reset, save and load
/// simulations. Engines share nothing, so several can run side by side.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    scenario: Scenario,
    seed: u64,
    weather: WeatherSeries,
    weather_rng: ChaCha12Rng,
    initial: World,
    world: World,
    safe: Option<Snapshot>,
}

/// Per-day inputs of the agent transition function.
struct Conditions {
    gate_open: bool,
    mortality: f64,
    reproduce_prob: f64,
    infection_pressure: bool,
    infection_prob: f64,
}

/// Outcome of one agent's daily transition.
struct Transition {
    state: PestState,
    reproduces: bool,
    infected: bool,
}

impl Engine {
    /// Create a new `Engine` with a field and population generated from `cfg`.
    pub fn generate_initial_condition(cfg: Config, weather: WeatherSeries) -> Result<Self> {
        let seed = cfg.init.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = ChaCha12Rng::seed_from_u64(seed);

        let field = &cfg.field;
        let grid = Grid::with_layout(
            field.width,
            field.height,
            field.layout,
            field.trap_crop_ratio,
            field.margin,
        )?;

        let population =
            seed_population(&grid, &cfg.init, &mut rng).context("failed to seed population")?;
        log::info!(
            "seeded {} agents on a {}x{} field (seed {seed})",
            population.n_live(),
            grid.width(),
            grid.height()
        );

        Self::assemble(cfg, grid, population, weather, seed, rng)
    }

    /// Create a new `Engine` from an explicit field and population.
    pub fn from_parts(
        cfg: Config,
        grid: Grid,
        population: Population,
        weather: WeatherSeries,
        seed: u64,
    ) -> Result<Self> {
        let rng = ChaCha12Rng::seed_from_u64(seed);
        Self::assemble(cfg, grid, population, weather, seed, rng)
    }

    fn assemble(
        cfg: Config,
        grid: Grid,
        population: Population,
        weather: WeatherSeries,
        seed: u64,
        rng: ChaCha12Rng,
    ) -> Result<Self> {
        let scenario = cfg.scenario()?;

        for (id, agt) in population.live() {
            grid.index(agt.x, agt.y)
                .with_context(|| format!("agent {id:?} is outside the field"))?;
        }

        let world = World {
            day: 0,
            streak: 0,
            outbreak: false,
            weather: None,
            grid,
            population,
            rng,
        };
        let safe = Some(metrics::compute_snapshot(&world, scenario));

        Ok(Self {
            cfg,
            scenario,
            seed,
            weather,
            weather_rng: ChaCha12Rng::seed_from_u64(seed ^ WEATHER_SEED_OFFSET),
            initial: world.clone(),
            world,
            safe,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn day(&self) -> usize {
        self.world.day
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn weather(&self) -> &WeatherSeries {
        &self.weather
    }

    /// Fill missing weather days up to `n_days` by extrapolation.
    pub fn extend_weather(&mut self, n_days: usize) -> usize {
        self.weather.extrapolate(n_days, &mut self.weather_rng)
    }

    /// Simulate one day.
    ///
    /// The day is staged on a copy of the world and committed only when it
    /// completed; on error the engine is left exactly as before the call.
    pub fn step(&mut self) -> Result<Snapshot, SimError> {
        let day = self.world.day;
        let sample = *self
            .weather
            .get(day)
            .ok_or(SimError::MissingWeatherData { day })?;

        let mut next = self.world.clone();
        next.advance(&self.cfg, self.scenario, sample)?;

        if next.outbreak && !self.world.outbreak {
            log::info!(
                "outbreak on day {day}: {}°C, {}% RH, streak {}",
                sample.temperature_c,
                sample.humidity_pct,
                next.streak
            );
        }
        self.world = next;

        let snapshot = self.current_snapshot();
        if self.cfg.output.auto_capture && !snapshot.state.outbreak {
            self.safe = Some(snapshot.clone());
        }
        log::debug!(
            "day {}: {} clusters, {:.2}% yield loss",
            snapshot.state.day,
            snapshot.state.population_count,
            snapshot.state.yield_loss_pct
        );

        Ok(snapshot)
    }

    pub fn current_snapshot(&self) -> Snapshot {
        metrics::compute_snapshot(&self.world, self.scenario)
    }

    pub fn last_safe_snapshot(&self) -> Option<&Snapshot> {
        self.safe.as_ref()
    }

    /// Store the current state as the last safe state.
    pub fn capture_safe_state(&mut self) -> &Snapshot {
        log::info!("captured safe state on day {}", self.world.day);
        let snapshot = self.current_snapshot();
        self.safe.insert(snapshot)
    }

    /// Compare the last safe state with the current state.
    pub fn compare(&self) -> Result<Option<DeltaReport>, SimError> {
        self.safe
            .as_ref()
            .map(|safe| metrics::diff(safe, &self.current_snapshot()))
            .transpose()
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry::from(&self.current_snapshot().state)
    }

    /// Go back to day 0 with the initial field, population and RNG state.
    pub fn reset(&mut self) {
        self.world = self.initial.clone();
        self.safe = Some(self.current_snapshot());
        log::info!("reset to day 0 (seed {})", self.seed);
    }

    /// Simulate `days_per_file` days and save the records to a binary file.
    ///
    /// Returns the number of days simulated, which is smaller when weather
    /// data runs out and extrapolation is disabled.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<usize> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let n_days = self.cfg.output.days_per_file;
        let mut n_done = 0;
        while n_done < n_days {
            let snapshot = match self.step() {
                Ok(snapshot) => snapshot,
                Err(SimError::MissingWeatherData { day }) if self.cfg.weather.extrapolate => {
                    let n_filled = self.extend_weather(day + n_days - n_done);
                    log::warn!("missing weather for day {day}, extrapolated {n_filled} days");
                    continue;
                }
                Err(SimError::MissingWeatherData { day }) => {
                    log::warn!("missing weather for day {day}, stopping");
                    break;
                }
                Err(err) => return Err(err).context("failed to perform step"),
            };

            let day = snapshot.state.day;
            let state = snapshot.state.clone();
            let snapshot = (day % self.cfg.output.snapshot_every == 0).then_some(snapshot);
            encode::write(&mut writer, &Record { state, snapshot })
                .context("failed to serialize record")?;

            n_done += 1;
            if n_done % self.cfg.output.snapshot_every == 0 || n_done == n_days {
                let progress = 100.0 * n_done as f64 / n_days as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(n_done)
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}

impl World {
    fn advance(
        &mut self,
        cfg: &Config,
        scenario: Scenario,
        sample: WeatherSample,
    ) -> Result<(), SimError> {
        let pest = &cfg.pest;

        let gate_open =
            scenario == Scenario::ForcedOutbreak || pest.in_breeding_window(&sample);
        self.streak = if gate_open { self.streak + 1 } else { 0 };

        let cond = Conditions {
            gate_open,
            mortality: pest.mortality(&sample),
            reproduce_prob: (pest.growth_rate * self.streak as f64).min(1.0),
            infection_pressure: self.population.any_infected(),
            infection_prob: pest.infection_prob,
        };

        self.update_agents(cfg, &cond)?;
        self.move_agents(&cfg.movement)?;
        self.split_agents(pest.split_count);
        self.apply_damage(cfg)?;

        self.outbreak = self.streak >= pest.outbreak_streak;
        self.weather = Some(sample);
        self.day += 1;

        Ok(())
    }

    fn update_agents(&mut self, cfg: &Config, cond: &Conditions) -> Result<(), SimError> {
        let pest = &cfg.pest;
        let mut occupancy = self.occupancy()?;

        for id in self.population.ids() {
            let Some(agt) = self.population.get_mut(id) else {
                continue;
            };
            if !agt.is_alive() {
                continue;
            }
            let i_cell = self.grid.index(agt.x, agt.y)?;

            let tr = transition(agt, cond, &mut self.rng);
            agt.state = tr.state;
            agt.infected = tr.infected;

            if tr.reproduces {
                // Growth never pushes a cell past its carrying capacity.
                let headroom =
                    (pest.carrying_capacity as u64).saturating_sub(occupancy[i_cell]);
                let grown = (agt.count as f64 * pest.growth_factor).ceil() as u32;
                let added = (grown.saturating_sub(agt.count) as u64).min(headroom) as u32;
                agt.count += added;
                occupancy[i_cell] += added as u64;
            }

            // Every living agent loses units, whatever its state.
            let n_dead = Binomial::new(agt.count as u64, cond.mortality)
                .map_err(|err| SimError::InvalidScenarioConfig(format!("mortality: {err}")))?
                .sample(&mut self.rng);
            agt.shrink(n_dead as u32);
            occupancy[i_cell] = occupancy[i_cell].saturating_sub(n_dead);
        }

        Ok(())
    }

    fn move_agents(&mut self, mv: &MovementConfig) -> Result<(), SimError> {
        for id in self.population.ids() {
            let Some(agt) = self.population.get_mut(id) else {
                continue;
            };
            if !agt.state.is_active() {
                continue;
            }
            let candidates = self.grid.neighbors(agt.x, agt.y, mv.neighbor_radius)?;
            if let Some((x, y)) = choose_target(&self.grid, &candidates, mv, &mut self.rng)? {
                agt.x = x;
                agt.y = y;
            }
        }
        Ok(())
    }

    fn split_agents(&mut self, split_count: u32) {
        for id in self.population.ids() {
            let Some(agt) = self.population.get_mut(id) else {
                continue;
            };
            if !agt.is_alive() || agt.count < split_count {
                continue;
            }
            let half = agt.count / 2;
            agt.count -= half;
            let offspring = PestAgent {
                count: half,
                ..agt.clone()
            };
            self.population.spawn(offspring);
        }
    }

    fn apply_damage(&mut self, cfg: &Config) -> Result<(), SimError> {
        let n_cells = self.grid.n_cells();
        let mut feeders = vec![0u64; n_cells];
        let mut vectors = vec![false; n_cells];
        for (_, agt) in self.population.live() {
            let i_cell = self.grid.index(agt.x, agt.y)?;
            match agt.state {
                PestState::Infected => vectors[i_cell] = true,
                PestState::Active | PestState::Reproducing => {
                    feeders[i_cell] += agt.count as u64;
                }
                PestState::Dormant | PestState::Dead => {}
            }
        }

        let capacity = cfg.pest.carrying_capacity as f64;
        for i_cell in 0..n_cells {
            let (x, y) = self.grid.coords(i_cell);
            if !self.grid.cell_at(x, y)?.crop.is_crop() {
                continue;
            }
            if feeders[i_cell] > 0 {
                let density = (feeders[i_cell] as f64 / capacity).min(1.0);
                self.grid
                    .apply_damage(x, y, cfg.damage.feeding_rate * density)?;
            }
            if vectors[i_cell] {
                self.grid.apply_damage(x, y, cfg.damage.viral_shock)?;
                self.grid.mark_exposed(x, y)?;
            }
        }

        Ok(())
    }

    // Clusters per cell over living agents.
    fn occupancy(&self) -> Result<Vec<u64>, SimError> {
        let mut occupancy = vec![0; self.grid.n_cells()];
        for (_, agt) in self.population.live() {
            occupancy[self.grid.index(agt.x, agt.y)?] += agt.count as u64;
        }
        Ok(occupancy)
    }
}

/// Daily state transition of a single agent.
fn transition<R: Rng>(agt: &PestAgent, cond: &Conditions, rng: &mut R) -> Transition {
    let mut infected = agt.infected;
    let (state, reproduces) = match (agt.state, cond.gate_open) {
        (PestState::Dead, _) => (PestState::Dead, false),
        (_, false) => (PestState::Dormant, false),
        (PestState::Dormant, true) => (PestState::Active, false),
        (_, true) => {
            let reproduces = rng.random_bool(cond.reproduce_prob);
            let state = if reproduces {
                PestState::Reproducing
            } else {
                PestState::Active
            };
            (state, reproduces)
        }
    };

    if state.is_active()
        && !infected
        && cond.infection_pressure
        && rng.random_bool(cond.infection_prob)
    {
        infected = true;
    }

    let state = if state.is_active() && infected {
        PestState::Infected
    } else {
        state
    };

    Transition {
        state,
        reproduces,
        infected,
    }
}

fn attraction(cell: &CellInfo, mv: &MovementConfig) -> f64 {
    let mut weight = 0.0;
    if cell.crop == CropType::Marigold {
        weight += mv.trap_attraction;
    }
    if cell.is_edge || cell.crop == CropType::Boundary {
        weight += mv.edge_attraction;
    }
    weight
}

/// Pick the destination of a moving agent among `candidates`.
///
/// Either a uniform random step or the most attractive candidate, with
/// ties broken uniformly.
fn choose_target<R: Rng>(
    grid: &Grid,
    candidates: &[(usize, usize)],
    mv: &MovementConfig,
    rng: &mut R,
) -> Result<Option<(usize, usize)>, SimError> {
    if candidates.is_empty() {
        return Ok(None);
    }
    if rng.random_bool(mv.random_walk_prob) {
        return Ok(candidates.choose(rng).copied());
    }

    let mut best = Vec::new();
    let mut best_weight = f64::NEG_INFINITY;
    for &(x, y) in candidates {
        let weight = attraction(&grid.cell_at(x, y)?, mv);
        if weight > best_weight {
            best_weight = weight;
            best.clear();
        }
        if weight == best_weight {
            best.push((x, y));
        }
    }
    Ok(best.choose(rng).copied())
}

/// Place `init.n_agents` dormant agents, favoring cells far from the centre.
fn seed_population<R: Rng>(grid: &Grid, init: &InitConfig, rng: &mut R) -> Result<Population> {
    let mut population = Population::new();
    if init.n_agents == 0 {
        return Ok(population);
    }

    let center_x = (grid.width() / 2) as f64;
    let center_y = (grid.height() / 2) as f64;
    let max_dist = center_x.hypot(center_y);
    let weights: Vec<f64> = (0..grid.n_cells())
        .map(|i_cell| {
            let (x, y) = grid.coords(i_cell);
            let dist = (x as f64 - center_x).hypot(y as f64 - center_y);
            if max_dist > 0.0 {
                SPAWN_FLOOR + dist / max_dist
            } else {
                1.0
            }
        })
        .collect();
    let cell_dist = WeightedIndex::new(&weights)?;

    for i_agt in 0..init.n_agents {
        let (x, y) = grid.coords(cell_dist.sample(rng));
        let infected = i_agt < init.n_infected;
        population.spawn(PestAgent::new(x, y, init.agent_count, infected));
    }

    Ok(population)
}

#[cfg(test)]
mod tests;
