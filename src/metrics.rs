//! Outbreak metrics derived from the world state.

use crate::config::Scenario;
use crate::engine::World;
use crate::error::SimError;
use crate::grid::CropType;
use crate::model::PestState;
use crate::weather::WeatherSample;
use serde::{Deserialize, Serialize};

/// Aggregate state of the simulation at a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Number of days simulated so far.
    pub day: usize,
    /// Weather that drove the last simulated day.
    pub weather: Option<WeatherSample>,
    /// Total clusters over living agents.
    pub population_count: u64,
    /// Number of living agents.
    pub n_agents: usize,
    /// Mean damage over tomato cells (%).
    pub yield_loss_pct: f64,
    /// Infected share of active agents times exposed share of tomato cells.
    pub viral_risk_index: f64,
    pub scenario: Scenario,
    /// Favorable streak reached the outbreak threshold.
    pub outbreak: bool,
}

/// Immutable deep copy of the state and per-cell data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: SimulationState,
    pub width: usize,
    pub height: usize,
    /// Damage per cell, row-major.
    pub cell_damage: Vec<f64>,
    /// Clusters per cell, row-major.
    pub cell_population: Vec<u64>,
}

/// Payload handed to the external advisory generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub day: usize,
    pub population_count: u64,
    pub yield_loss_pct: f64,
    pub viral_risk_index: f64,
    pub scenario_mode: Scenario,
}

impl From<&SimulationState> for Telemetry {
    fn from(state: &SimulationState) -> Self {
        Self {
            day: state.day,
            population_count: state.population_count,
            yield_loss_pct: state.yield_loss_pct,
            viral_risk_index: state.viral_risk_index,
            scenario_mode: state.scenario,
        }
    }
}

/// Change of a single cell between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDelta {
    pub x: usize,
    pub y: usize,
    pub damage: f64,
    pub population: i64,
}

/// Differences `current - baseline` between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub baseline_day: usize,
    pub current_day: usize,
    pub population_count: i64,
    pub yield_loss_pct: f64,
    pub viral_risk_index: f64,
    /// Cells whose damage or population changed, row-major.
    pub cells: Vec<CellDelta>,
}

impl DeltaReport {
    pub fn is_zero(&self) -> bool {
        self.population_count == 0
            && self.yield_loss_pct == 0.0
            && self.viral_risk_index == 0.0
            && self.cells.is_empty()
    }
}

/// Compute the metrics of `world`. Never mutates its input.
pub fn compute_snapshot(world: &World, scenario: Scenario) -> Snapshot {
    let grid = &world.grid;
    let pop = &world.population;

    let mut cell_population = vec![0; grid.n_cells()];
    let mut n_active = 0;
    let mut n_active_infected = 0;
    for (_, agt) in pop.live() {
        if let Ok(i_cell) = grid.index(agt.x, agt.y) {
            cell_population[i_cell] += agt.count as u64;
        }
        if agt.state.is_active() {
            n_active += 1;
        }
        if agt.state == PestState::Infected {
            n_active_infected += 1;
        }
    }

    let mut n_tomato = 0;
    let mut n_exposed = 0;
    let mut damage_sum = 0.0;
    for cell in grid.cells().filter(|cell| cell.crop == CropType::Tomato) {
        n_tomato += 1;
        damage_sum += cell.damage;
        if cell.exposed {
            n_exposed += 1;
        }
    }

    // Every tomato cell holds the same number of plants.
    let yield_loss_pct = if n_tomato > 0 {
        damage_sum / n_tomato as f64
    } else {
        0.0
    };

    let viral_risk_index = if n_active > 0 && n_tomato > 0 {
        (n_active_infected as f64 / n_active as f64) * (n_exposed as f64 / n_tomato as f64)
    } else {
        0.0
    };

    let state = SimulationState {
        day: world.day,
        weather: world.weather,
        population_count: pop.total_count(),
        n_agents: pop.n_live(),
        yield_loss_pct,
        viral_risk_index,
        scenario,
        outbreak: world.outbreak,
    };

    Snapshot {
        state,
        width: grid.width(),
        height: grid.height(),
        cell_damage: grid.damage_vec(),
        cell_population,
    }
}

/// Compare `current` against `baseline`. Neither input is modified.
pub fn diff(baseline: &Snapshot, current: &Snapshot) -> Result<DeltaReport, SimError> {
    if (baseline.width, baseline.height) != (current.width, current.height) {
        return Err(SimError::GridMismatch {
            lhs: (baseline.width, baseline.height),
            rhs: (current.width, current.height),
        });
    }

    let cells = baseline
        .cell_damage
        .iter()
        .zip(&current.cell_damage)
        .zip(baseline.cell_population.iter().zip(&current.cell_population))
        .enumerate()
        .filter_map(|(i_cell, ((&dmg_a, &dmg_b), (&pop_a, &pop_b)))| {
            let damage = dmg_b - dmg_a;
            let population = pop_b as i64 - pop_a as i64;
            (damage != 0.0 || population != 0).then(|| CellDelta {
                x: i_cell % current.width,
                y: i_cell / current.width,
                damage,
                population,
            })
        })
        .collect();

    let (a, b) = (&baseline.state, &current.state);
    Ok(DeltaReport {
        baseline_day: a.day,
        current_day: b.day,
        population_count: b.population_count as i64 - a.population_count as i64,
        yield_loss_pct: b.yield_loss_pct - a.yield_loss_pct,
        viral_risk_index: b.viral_risk_index - a.viral_risk_index,
        cells,
    })
}
