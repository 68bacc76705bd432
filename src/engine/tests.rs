use super::*;
use crate::config::{FieldConfig, PestConfig};
use crate::grid::{Layout, MAX_DAMAGE};
use std::fs;

fn make_config(scenario: Scenario) -> Config {
    let mut cfg = Config {
        scenario: scenario.as_str().to_string(),
        ..Config::default()
    };
    cfg.pest.baseline_mortality = 0.0;
    cfg
}

fn single_cell_engine(cfg: Config, agents: Vec<PestAgent>, n_days: usize) -> Engine {
    let grid = Grid::new(1, 1, CropType::Tomato).unwrap();
    let mut population = Population::new();
    for agt in agents {
        population.spawn(agt);
    }
    Engine::from_parts(
        cfg,
        grid,
        population,
        WeatherSeries::constant(n_days, 29.0, 55.0),
        1,
    )
    .unwrap()
}

fn live_counts(engine: &Engine) -> Vec<u32> {
    engine
        .world()
        .population
        .live()
        .map(|(_, agt)| agt.count)
        .collect()
}

#[test]
fn forced_outbreak_grows_population_despite_weather() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.field = FieldConfig {
        width: 10,
        height: 10,
        layout: Layout::Monoculture,
        ..FieldConfig::default()
    };
    cfg.init.seed = Some(17);
    cfg.init.n_agents = 10;

    let weather = WeatherSeries::constant(5, 10.0, 90.0);
    let mut engine = Engine::generate_initial_condition(cfg, weather).unwrap();
    let initial = engine.current_snapshot().state.population_count;
    assert_eq!(initial, 10 * 4);

    for _ in 0..5 {
        engine.step().unwrap();
    }

    let state = engine.current_snapshot().state;
    assert_eq!(state.day, 5);
    assert!(state.outbreak);
    assert!(state.population_count > initial);
}

#[test]
fn cold_humid_weather_keeps_agents_dormant() {
    let mut cfg = make_config(Scenario::RealData);
    cfg.init.seed = Some(5);

    let weather = WeatherSeries::constant(10, 10.0, 90.0);
    let mut engine = Engine::generate_initial_condition(cfg, weather).unwrap();
    let initial = engine.current_snapshot().state;

    for _ in 0..10 {
        let snapshot = engine.step().unwrap();
        assert_eq!(snapshot.state.yield_loss_pct, initial.yield_loss_pct);
        assert!(!snapshot.state.outbreak);
    }

    let world = engine.world();
    assert!(
        world
            .population
            .live()
            .all(|(_, agt)| agt.state == PestState::Dormant)
    );
    assert!(world.grid.cells().all(|cell| cell.damage == 0.0));
    assert!(world.population.total_count() <= initial.population_count);
    assert_eq!(world.streak, 0);
}

#[test]
fn infected_agent_delivers_exact_viral_shock() {
    let cfg = make_config(Scenario::ForcedOutbreak);
    let mut engine = single_cell_engine(cfg, vec![PestAgent::new(0, 0, 1, true)], 1);

    engine.step().unwrap();

    let cell = engine.world().grid.cell_at(0, 0).unwrap();
    assert_eq!(cell.damage, 25.0);
    assert!(cell.exposed);
    let (_, agt) = engine.world().population.live().next().unwrap();
    assert_eq!(agt.state, PestState::Infected);
}

#[test]
fn viral_shock_lands_where_the_vector_moved() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.movement.random_walk_prob = 0.0;
    let grid = Grid::new(3, 3, CropType::Tomato).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(1, 1, 50, true));
    let weather = WeatherSeries::constant(1, 29.0, 55.0);
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 5).unwrap();

    engine.step().unwrap();

    let world = engine.world();
    let (_, agt) = world.population.live().next().unwrap();
    assert_ne!((agt.x, agt.y), (1, 1));
    assert_eq!(agt.state, PestState::Infected);

    // A full-capacity vector deals the shock only, no feeding damage.
    let target = world.grid.cell_at(agt.x, agt.y).unwrap();
    assert_eq!(target.damage, 25.0);
    assert!(target.exposed);
    for cell in world.grid.cells() {
        if (cell.x, cell.y) != (agt.x, agt.y) {
            assert_eq!(cell.damage, 0.0);
            assert!(!cell.exposed);
        }
    }
}

#[test]
fn viral_shock_is_clamped_at_total_loss() {
    let cfg = make_config(Scenario::ForcedOutbreak);
    let mut grid = Grid::new(1, 1, CropType::Tomato).unwrap();
    grid.apply_damage(0, 0, 90.0).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(0, 0, 1, true));
    let weather = WeatherSeries::constant(1, 29.0, 55.0);
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 1).unwrap();

    engine.step().unwrap();

    let cell = engine.world().grid.cell_at(0, 0).unwrap();
    assert_eq!(cell.damage, MAX_DAMAGE);
    assert!(cell.total_loss());
    assert_eq!(engine.current_snapshot().state.yield_loss_pct, MAX_DAMAGE);
}

#[test]
fn same_seed_and_weather_give_identical_runs() {
    let mut cfg = make_config(Scenario::RealData);
    cfg.init.seed = Some(2024);

    let mut weather = WeatherSeries::default();
    weather.extrapolate(40, &mut ChaCha12Rng::seed_from_u64(9));

    let mut a = Engine::generate_initial_condition(cfg.clone(), weather.clone()).unwrap();
    let mut b = Engine::generate_initial_condition(cfg, weather).unwrap();

    for _ in 0..40 {
        a.step().unwrap();
        b.step().unwrap();
        assert_eq!(a.world().population, b.world().population);
        assert_eq!(a.world().grid, b.world().grid);
    }
}

#[test]
fn missing_weather_fails_without_mutation() {
    let cfg = make_config(Scenario::ForcedOutbreak);
    let grid = Grid::new(4, 4, CropType::Tomato).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(1, 1, 3, true));
    population.spawn(PestAgent::new(2, 2, 3, false));
    let weather = WeatherSeries::new(
        [0, 1, 3].map(|day| WeatherSample {
            day,
            temperature_c: 29.0,
            humidity_pct: 55.0,
            rain: false,
        }),
    );
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 3).unwrap();

    engine.step().unwrap();
    engine.step().unwrap();
    let before = engine.world().clone();
    let safe_before = engine.last_safe_snapshot().cloned();

    assert_eq!(
        engine.step().unwrap_err(),
        SimError::MissingWeatherData { day: 2 }
    );
    assert_eq!(engine.world(), &before);
    assert_eq!(engine.last_safe_snapshot().cloned(), safe_before);
    assert_eq!(engine.day(), 2);

    assert_eq!(engine.extend_weather(3), 1);
    engine.step().unwrap();
    assert_eq!(engine.day(), 3);
}

#[test]
fn extinct_agents_leave_the_live_population() {
    let mut cfg = make_config(Scenario::RealData);
    cfg.pest.decay_rate = 1.0;
    let grid = Grid::new(3, 3, CropType::Tomato).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(0, 0, 5, false));
    population.spawn(PestAgent::new(2, 1, 2, true));
    let weather = WeatherSeries::constant(2, 12.0, 95.0);
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 8).unwrap();

    let state = engine.step().unwrap().state;

    assert_eq!(state.population_count, 0);
    assert_eq!(state.n_agents, 0);
    assert_eq!(engine.world().population.n_slots(), 2);
    assert!(!engine.world().population.any_infected());

    engine.step().unwrap();
    assert_eq!(engine.world().population.n_live(), 0);
}

#[test]
fn rain_inside_breeding_window_kills_active_agents() {
    let mut cfg = make_config(Scenario::RealData);
    cfg.pest.decay_rate = 1.0;
    let grid = Grid::new(3, 3, CropType::Tomato).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(1, 1, 5, false));
    let weather = WeatherSeries::new((0..5).map(|day| WeatherSample {
        day,
        temperature_c: 28.0,
        humidity_pct: 63.0,
        rain: true,
    }));
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 11).unwrap();

    let state = engine.step().unwrap().state;
    assert_eq!(engine.world().streak, 1);
    assert_eq!(state.population_count, 0);

    for _ in 0..4 {
        engine.step().unwrap();
    }
    assert_eq!(engine.world().population.total_count(), 0);
}

#[test]
fn forced_outbreak_keeps_baseline_mortality() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.pest.growth_rate = 0.0;
    cfg.pest.baseline_mortality = 1.0;
    let mut engine = single_cell_engine(cfg, vec![PestAgent::new(0, 0, 7, false)], 1);

    let state = engine.step().unwrap().state;

    assert_eq!(state.population_count, 0);
    assert_eq!(engine.world().population.n_live(), 0);
}

#[test]
fn crowded_cell_beyond_u32_does_not_overflow() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.pest.growth_rate = 1.0;
    cfg.pest.carrying_capacity = 100_000;
    cfg.pest.split_count = 100_000;
    let agents = (0..50_000)
        .map(|_| PestAgent::new(0, 0, 99_999, false))
        .collect();
    let mut engine = single_cell_engine(cfg, agents, 2);
    let initial = engine.world().population.total_count();
    assert!(initial > u32::MAX as u64);

    engine.step().unwrap();
    engine.step().unwrap();

    assert_eq!(engine.world().population.total_count(), initial);
    assert_eq!(engine.current_snapshot().cell_population, vec![initial]);
}

#[test]
fn pests_move_to_the_trap_crop() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.movement.random_walk_prob = 0.0;
    let mut grid = Grid::new(5, 5, CropType::Tomato).unwrap();
    grid.set_crop(3, 2, CropType::Marigold).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(2, 2, 1, false));
    let weather = WeatherSeries::constant(1, 29.0, 55.0);
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 4).unwrap();

    engine.step().unwrap();

    let (_, agt) = engine.world().population.live().next().unwrap();
    assert_eq!((agt.x, agt.y), (3, 2));
}

#[test]
fn pests_drift_to_the_edge_without_trap_crop() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.movement.random_walk_prob = 0.0;
    let grid = Grid::new(4, 4, CropType::Tomato).unwrap();
    let mut population = Population::new();
    for _ in 0..20 {
        population.spawn(PestAgent::new(1, 1, 1, false));
    }
    let weather = WeatherSeries::constant(1, 29.0, 55.0);
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 6).unwrap();

    engine.step().unwrap();

    let world = engine.world();
    for (_, agt) in world.population.live() {
        assert!(world.grid.is_edge(agt.x, agt.y), "agent at ({}, {})", agt.x, agt.y);
    }
}

#[test]
fn dormant_pests_stay_put() {
    let cfg = make_config(Scenario::RealData);
    let grid = Grid::new(5, 5, CropType::Tomato).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(2, 2, 3, false));
    let weather = WeatherSeries::constant(3, 20.0, 50.0);
    let mut engine = Engine::from_parts(cfg, grid, population, weather, 4).unwrap();

    for _ in 0..3 {
        engine.step().unwrap();
    }

    let (_, agt) = engine.world().population.live().next().unwrap();
    assert_eq!((agt.x, agt.y, agt.count), (2, 2, 3));
    assert_eq!(agt.state, PestState::Dormant);
}

#[test]
fn growth_respects_carrying_capacity() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.pest = PestConfig {
        growth_rate: 1.0,
        carrying_capacity: 10,
        split_count: 100,
        ..PestConfig::default()
    };
    let mut engine = single_cell_engine(cfg, vec![PestAgent::new(0, 0, 8, false)], 4);

    engine.step().unwrap();
    assert_eq!(live_counts(&engine), vec![8]);
    for _ in 0..3 {
        engine.step().unwrap();
        assert!(engine.world().population.total_count() <= 10);
    }
    assert_eq!(live_counts(&engine), vec![10]);
}

#[test]
fn crowded_agents_split() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.pest = PestConfig {
        growth_rate: 1.0,
        carrying_capacity: 100,
        split_count: 16,
        ..PestConfig::default()
    };
    let mut engine = single_cell_engine(cfg, vec![PestAgent::new(0, 0, 15, false)], 2);

    engine.step().unwrap();
    engine.step().unwrap();

    assert_eq!(live_counts(&engine), vec![10, 9]);
    let pop = &engine.world().population;
    assert_eq!(pop.n_slots(), 2);
    assert!(pop.live().all(|(_, agt)| agt.state == PestState::Reproducing));
}

#[test]
fn virus_spreads_between_active_agents() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.pest.infection_prob = 1.0;
    let agents = vec![
        PestAgent::new(0, 0, 1, true),
        PestAgent::new(0, 0, 1, false),
    ];
    let mut engine = single_cell_engine(cfg, agents, 1);

    let state = engine.step().unwrap().state;

    let pop = &engine.world().population;
    assert!(pop.live().all(|(_, agt)| agt.infected));
    assert!(pop.live().all(|(_, agt)| agt.state == PestState::Infected));
    assert_eq!(state.viral_risk_index, 1.0);
}

#[test]
fn no_spread_without_a_carrier() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.pest.infection_prob = 1.0;
    let mut engine = single_cell_engine(cfg, vec![PestAgent::new(0, 0, 1, false)], 3);

    for _ in 0..3 {
        engine.step().unwrap();
    }
    assert!(!engine.world().population.any_infected());
}

#[test]
fn reset_replays_the_same_run() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.field.width = 12;
    cfg.field.height = 12;
    cfg.init.seed = Some(77);
    let weather = WeatherSeries::constant(6, 29.0, 55.0);
    let mut engine = Engine::generate_initial_condition(cfg, weather).unwrap();
    let initial = engine.world().clone();

    for _ in 0..6 {
        engine.step().unwrap();
    }
    let first = engine.current_snapshot();

    engine.reset();
    assert_eq!(engine.day(), 0);
    assert_eq!(engine.world(), &initial);
    assert_eq!(engine.last_safe_snapshot().map(|s| s.state.day), Some(0));

    for _ in 0..6 {
        engine.step().unwrap();
    }
    assert_eq!(engine.current_snapshot(), first);
}

#[test]
fn safe_state_tracks_last_calm_day() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.field.width = 8;
    cfg.field.height = 8;
    cfg.init.seed = Some(3);
    let weather = WeatherSeries::constant(5, 29.0, 55.0);
    let mut engine = Engine::generate_initial_condition(cfg.clone(), weather.clone()).unwrap();

    for _ in 0..5 {
        engine.step().unwrap();
    }
    let report = engine.compare().unwrap().unwrap();
    assert_eq!(report.baseline_day, 1);
    assert_eq!(report.current_day, 5);
    assert!(report.population_count > 0);

    engine.capture_safe_state();
    assert!(engine.compare().unwrap().unwrap().is_zero());

    cfg.output.auto_capture = false;
    let mut engine = Engine::generate_initial_condition(cfg, weather).unwrap();
    for _ in 0..5 {
        engine.step().unwrap();
    }
    assert_eq!(engine.last_safe_snapshot().unwrap().state.day, 0);
}

#[test]
fn telemetry_mirrors_current_state() {
    let mut cfg = make_config(Scenario::ForcedOutbreak);
    cfg.init.seed = Some(12);
    let weather = WeatherSeries::constant(3, 29.0, 55.0);
    let mut engine = Engine::generate_initial_condition(cfg, weather).unwrap();
    for _ in 0..3 {
        engine.step().unwrap();
    }

    let state = engine.current_snapshot().state;
    let telemetry = engine.telemetry();
    assert_eq!(telemetry.day, 3);
    assert_eq!(telemetry.population_count, state.population_count);
    assert_eq!(telemetry.yield_loss_pct, state.yield_loss_pct);
    assert_eq!(telemetry.viral_risk_index, state.viral_risk_index);
    assert_eq!(telemetry.scenario_mode, Scenario::ForcedOutbreak);
}

#[test]
fn unknown_scenario_fails_construction() {
    let cfg = Config {
        scenario: "drought".to_string(),
        ..Config::default()
    };
    let grid = Grid::new(2, 2, CropType::Tomato).unwrap();
    let err = Engine::from_parts(cfg, grid, Population::new(), WeatherSeries::default(), 0)
        .err()
        .unwrap();
    assert_eq!(
        err.root_cause().downcast_ref::<SimError>(),
        Some(&SimError::InvalidScenarioConfig("drought".to_string()))
    );
}

#[test]
fn agents_outside_the_field_are_rejected() {
    let grid = Grid::new(2, 2, CropType::Tomato).unwrap();
    let mut population = Population::new();
    population.spawn(PestAgent::new(2, 0, 1, false));
    let result = Engine::from_parts(
        Config::default(),
        grid,
        population,
        WeatherSeries::default(),
        0,
    );
    assert!(result.is_err());
}

#[test]
fn simulation_chunks_and_checkpoints() {
    let dir = std::env::temp_dir().join(format!("thripsim-engine-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let mut cfg = make_config(Scenario::RealData);
    cfg.field.width = 10;
    cfg.field.height = 10;
    cfg.init.seed = Some(21);
    cfg.weather.extrapolate = false;
    cfg.output.days_per_file = 12;
    cfg.output.snapshot_every = 4;
    let weather = WeatherSeries::constant(5, 27.0, 50.0);

    let mut engine = Engine::generate_initial_condition(cfg.clone(), weather.clone()).unwrap();
    let n_done = engine.perform_simulation(dir.join("short.msgpack")).unwrap();
    assert_eq!(n_done, 5);
    assert_eq!(engine.day(), 5);

    cfg.weather.extrapolate = true;
    let mut engine = Engine::generate_initial_condition(cfg, weather).unwrap();
    let n_done = engine.perform_simulation(dir.join("long.msgpack")).unwrap();
    assert_eq!(n_done, 12);
    assert_eq!(engine.weather().len(), 12);

    let checkpoint = dir.join("checkpoint.msgpack");
    engine.save_checkpoint(&checkpoint).unwrap();
    let loaded = Engine::load_checkpoint(&checkpoint).unwrap();
    assert_eq!(loaded.world(), engine.world());
    assert_eq!(loaded.cfg(), engine.cfg());
    assert_eq!(loaded.seed(), 21);

    fs::remove_dir_all(&dir).ok();
}
