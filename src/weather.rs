//! Daily weather samples consumed by the step engine.

use anyhow::{Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Weather of a single simulated day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub day: usize,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    #[serde(default)]
    pub rain: bool,
}

/// Ordered series of daily samples, possibly with gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeries {
    samples: BTreeMap<usize, WeatherSample>,
}

#[derive(Deserialize)]
struct WeatherFile {
    #[serde(default)]
    sample: Vec<WeatherSample>,
}

impl WeatherSeries {
    /// Build a series from samples; later duplicates of a day replace earlier ones.
    pub fn new<I: IntoIterator<Item = WeatherSample>>(samples: I) -> Self {
        let samples = samples.into_iter().map(|s| (s.day, s)).collect();
        Self { samples }
    }

    /// Same weather on days `0..n_days`.
    pub fn constant(n_days: usize, temperature_c: f64, humidity_pct: f64) -> Self {
        Self::new((0..n_days).map(|day| WeatherSample {
            day,
            temperature_c,
            humidity_pct,
            rain: false,
        }))
    }

    /// Load a series from a TOML file made of `[[sample]]` tables.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        let weather_file: WeatherFile =
            toml::from_str(&contents).context("failed to deserialize weather samples")?;
        Ok(Self::new(weather_file.sample))
    }

    pub fn get(&self, day: usize) -> Option<&WeatherSample> {
        self.samples.get(&day)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fill every missing day in `0..n_days` with a bounded random walk.
    ///
    /// Each filled day starts from the closest known earlier day. Known
    /// samples are never modified.
    pub fn extrapolate<R: Rng>(&mut self, n_days: usize, rng: &mut R) -> usize {
        let mut n_filled = 0;
        let (mut temp, mut hum) = (WALK_START_TEMP, WALK_START_HUM);
        for day in 0..n_days {
            if let Some(sample) = self.samples.get(&day) {
                temp = sample.temperature_c;
                hum = sample.humidity_pct;
                continue;
            }

            temp = (temp + rng.random_range(-WALK_TEMP_STEP..=WALK_TEMP_STEP))
                .clamp(WALK_TEMP_MIN, WALK_TEMP_MAX);
            hum = (hum + rng.random_range(-WALK_HUM_STEP..=WALK_HUM_STEP))
                .clamp(WALK_HUM_MIN, WALK_HUM_MAX);
            let rain = rng.random_bool(WALK_RAIN_PROB);

            let sample = WeatherSample {
                day,
                temperature_c: (temp * 10.0).round() / 10.0,
                humidity_pct: hum.trunc(),
                rain,
            };
            self.samples.insert(day, sample);
            n_filled += 1;
        }
        if n_filled > 0 {
            log::debug!("extrapolated {n_filled} weather days");
        }
        n_filled
    }
}

const WALK_START_TEMP: f64 = 28.0;
const WALK_START_HUM: f64 = 50.0;
const WALK_TEMP_STEP: f64 = 1.5;
const WALK_HUM_STEP: f64 = 5.0;
const WALK_TEMP_MIN: f64 = 15.0;
const WALK_TEMP_MAX: f64 = 38.0;
const WALK_HUM_MIN: f64 = 20.0;
const WALK_HUM_MAX: f64 = 95.0;
const WALK_RAIN_PROB: f64 = 0.1;
