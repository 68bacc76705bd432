//! Simulation configuration.

use crate::error::SimError;
use crate::grid::Layout;
use crate::weather::WeatherSample;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path, path::PathBuf, str::FromStr};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Scenario mode, `"real-data"` or `"forced-outbreak"`.
    pub scenario: String,

    /// Field parameters.
    pub field: FieldConfig,
    /// Pest lifecycle parameters.
    pub pest: PestConfig,
    /// Pest movement parameters.
    pub movement: MovementConfig,
    /// Crop damage parameters.
    pub damage: DamageConfig,
    /// Initial condition parameters.
    pub init: InitConfig,
    /// Weather input parameters.
    pub weather: WeatherConfig,
    /// Output parameters.
    pub output: OutputConfig,
}

/// Field layout parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldConfig {
    /// Number of cells along x.
    pub width: usize,
    /// Number of cells along y.
    pub height: usize,
    /// Planting pattern.
    pub layout: Layout,
    /// Fraction of rows planted with marigold (intercropping only).
    pub trap_crop_ratio: f64,
    /// Number of outer rings left unplanted.
    pub margin: usize,
}

/// Pest lifecycle parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PestConfig {
    /// Lowest breeding temperature (°C, inclusive).
    pub breeding_temp_min: f64,
    /// Highest breeding temperature (°C, inclusive).
    pub breeding_temp_max: f64,
    /// Breeding requires relative humidity strictly below this (%).
    pub breeding_humidity_max: f64,
    /// Dormant agents decay above this relative humidity (%) or in rain.
    pub mortality_humidity: f64,
    /// Reproduction probability per day of favorable streak.
    pub growth_rate: f64,
    /// Count multiplier applied on reproduction.
    pub growth_factor: f64,
    /// Per-unit daily death probability under unfavorable weather.
    pub decay_rate: f64,
    /// Per-unit daily death probability under any other weather.
    pub baseline_mortality: f64,
    /// Daily infection probability while the virus is present.
    pub infection_prob: f64,
    /// Maximum number of units a cell can sustain through growth.
    pub carrying_capacity: u32,
    /// Count at which an agent splits in two.
    pub split_count: u32,
    /// Favorable streak length that marks an outbreak.
    pub outbreak_streak: usize,
}

/// Pest movement parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MovementConfig {
    /// Attraction of marigold cells.
    pub trap_attraction: f64,
    /// Attraction of edge and boundary cells.
    pub edge_attraction: f64,
    /// Probability of an unbiased random step.
    pub random_walk_prob: f64,
    /// Chebyshev radius of the candidate neighborhood.
    pub neighbor_radius: usize,
}

/// Crop damage parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DamageConfig {
    /// Daily feeding damage on a cell at carrying capacity (%).
    pub feeding_rate: f64,
    /// Daily damage caused by an infected vector on a cell (%).
    pub viral_shock: f64,
}

/// Initial condition parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitConfig {
    /// Random seed; drawn from the OS when absent.
    pub seed: Option<u64>,
    /// Number of seeded agents.
    pub n_agents: usize,
    /// Initial count of each agent (units of ~500 pests).
    pub agent_count: u32,
    /// Number of seeded agents carrying the virus.
    pub n_infected: usize,
}

/// Weather input parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    /// Weather samples file, relative to the simulation directory.
    pub file: Option<PathBuf>,
    /// Number of days the series must cover after extrapolation.
    pub n_days: usize,
    /// Fill missing days with a random walk.
    pub extrapolate: bool,
}

/// Output parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Number of days simulated per trajectory file.
    pub days_per_file: usize,
    /// Store a full snapshot every this many days.
    pub snapshot_every: usize,
    /// Capture the last safe state after every non-outbreak day.
    pub auto_capture: bool,
}

/// Scenario mode of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Breeding follows the weather.
    RealData,
    /// Breeding happens every day regardless of the weather.
    ForcedOutbreak,
}

impl FromStr for Scenario {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real-data" => Ok(Scenario::RealData),
            "forced-outbreak" => Ok(Scenario::ForcedOutbreak),
            _ => Err(SimError::InvalidScenarioConfig(s.to_string())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenario: Scenario::RealData.as_str().to_string(),
            field: FieldConfig::default(),
            pest: PestConfig::default(),
            movement: MovementConfig::default(),
            damage: DamageConfig::default(),
            init: InitConfig::default(),
            weather: WeatherConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            width: 40,
            height: 40,
            layout: Layout::Intercropping,
            trap_crop_ratio: 0.2,
            margin: 0,
        }
    }
}

impl Default for PestConfig {
    fn default() -> Self {
        Self {
            breeding_temp_min: 25.0,
            breeding_temp_max: 32.0,
            breeding_humidity_max: 65.0,
            mortality_humidity: 60.0,
            growth_rate: 0.25,
            growth_factor: 1.25,
            decay_rate: 0.1,
            baseline_mortality: 0.05,
            infection_prob: 0.05,
            carrying_capacity: 50,
            split_count: 16,
            outbreak_streak: 2,
        }
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            trap_attraction: 3.0,
            edge_attraction: 1.0,
            random_walk_prob: 0.2,
            neighbor_radius: 1,
        }
    }
}

impl Default for DamageConfig {
    fn default() -> Self {
        Self {
            feeding_rate: 5.0,
            viral_shock: 25.0,
        }
    }
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            seed: None,
            n_agents: 60,
            agent_count: 4,
            n_infected: 1,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            file: None,
            n_days: 100,
            extrapolate: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            days_per_file: 50,
            snapshot_every: 10,
            auto_capture: true,
        }
    }
}

impl PestConfig {
    /// Whether `sample` lies in the thrips breeding window.
    pub fn in_breeding_window(&self, sample: &WeatherSample) -> bool {
        (self.breeding_temp_min..=self.breeding_temp_max).contains(&sample.temperature_c)
            && sample.humidity_pct < self.breeding_humidity_max
    }

    /// Whether `sample` raises pest mortality to the decay rate.
    pub fn is_unfavorable(&self, sample: &WeatherSample) -> bool {
        sample.rain || sample.humidity_pct > self.mortality_humidity
    }

    /// Per-unit death probability on a day with weather `sample`.
    pub fn mortality(&self, sample: &WeatherSample) -> f64 {
        if self.is_unfavorable(sample) {
            self.decay_rate
        } else {
            self.baseline_mortality
        }
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded; missing sections and fields take
    /// their default values. Performs validation on all parameters before
    /// returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML-encoded [`Config`].
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Parsed scenario mode.
    pub fn scenario(&self) -> Result<Scenario, SimError> {
        self.scenario.parse()
    }

    pub fn validate(&self) -> Result<()> {
        self.scenario().context("invalid scenario")?;

        let field = &self.field;
        check_num(field.width, 1..=1_000).context("invalid field width")?;
        check_num(field.height, 1..=1_000).context("invalid field height")?;
        check_num(field.trap_crop_ratio, 0.0..=1.0).context("invalid trap crop ratio")?;
        check_num(field.margin, 0..=field.width.min(field.height) / 2)
            .context("invalid field margin")?;

        let pest = &self.pest;
        check_num(pest.breeding_temp_min, -50.0..=60.0)
            .context("invalid minimum breeding temperature")?;
        check_num(pest.breeding_temp_max, pest.breeding_temp_min..=60.0)
            .context("invalid maximum breeding temperature")?;
        check_num(pest.breeding_humidity_max, 0.0..=100.0)
            .context("invalid maximum breeding humidity")?;
        check_num(pest.mortality_humidity, 0.0..=100.0).context("invalid mortality humidity")?;
        check_num(pest.growth_rate, 0.0..=1.0).context("invalid growth rate")?;
        check_num(pest.growth_factor, 1.0..=10.0).context("invalid growth factor")?;
        check_num(pest.decay_rate, 0.0..=1.0).context("invalid decay rate")?;
        check_num(pest.baseline_mortality, 0.0..=1.0).context("invalid baseline mortality")?;
        check_num(pest.infection_prob, 0.0..=1.0).context("invalid infection probability")?;
        check_num(pest.carrying_capacity, 1..=100_000).context("invalid carrying capacity")?;
        check_num(pest.split_count, 2..=100_000).context("invalid split count")?;
        check_num(pest.outbreak_streak, 1..=1_000).context("invalid outbreak streak")?;

        let movement = &self.movement;
        check_num(movement.edge_attraction, 0.0..=1_000.0).context("invalid edge attraction")?;
        if movement.trap_attraction <= movement.edge_attraction {
            bail!(
                "trap attraction must exceed edge attraction ({}), but is {}",
                movement.edge_attraction,
                movement.trap_attraction
            );
        }
        check_num(movement.trap_attraction, 0.0..=1_000.0).context("invalid trap attraction")?;
        check_num(movement.random_walk_prob, 0.0..=1.0)
            .context("invalid random walk probability")?;
        check_num(movement.neighbor_radius, 1..=10).context("invalid neighbor radius")?;

        let damage = &self.damage;
        check_num(damage.feeding_rate, 0.0..=100.0).context("invalid feeding rate")?;
        check_num(damage.viral_shock, 0.0..=100.0).context("invalid viral shock")?;

        let init = &self.init;
        check_num(init.n_agents, 0..=100_000).context("invalid initial number of agents")?;
        check_num(init.agent_count, 1..=pest.carrying_capacity)
            .context("invalid initial agent count")?;
        check_num(init.n_infected, 0..=init.n_agents)
            .context("invalid initial number of infected agents")?;

        check_num(self.weather.n_days, 0..=100_000).context("invalid number of weather days")?;

        let output = &self.output;
        check_num(output.days_per_file, 1..=100_000).context("invalid number of days per file")?;
        check_num(output.snapshot_every, 1..=100_000).context("invalid snapshot interval")?;

        Ok(())
    }
}

impl Scenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::RealData => "real-data",
            Scenario::ForcedOutbreak => "forced-outbreak",
        }
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
