//! Trajectory analysis over recorded simulation days.

use crate::engine::Record;
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::Serialize;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Summary produced by an observable.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Report {
    Stats(AccumulatorReport),
    Outbreak(OutbreakReport),
    Final(FinalReport),
}

#[derive(Debug, Serialize)]
pub struct OutbreakReport {
    pub n_outbreak_days: usize,
    pub first_outbreak_day: Option<usize>,
    pub peak_yield_loss_day: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub day: usize,
    pub population_count: u64,
    pub yield_loss_pct: f64,
    pub viral_risk_index: f64,
}

pub trait Obs {
    fn name(&self) -> &'static str;
    fn update(&mut self, record: &Record);
    fn report(&self) -> Report;
}

/// Statistics of one scalar metric over all recorded days.
pub struct MetricObs {
    name: &'static str,
    extract: fn(&Record) -> f64,
    acc: Accumulator,
}

impl MetricObs {
    pub fn new(name: &'static str, extract: fn(&Record) -> f64) -> Self {
        Self {
            name,
            extract,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for MetricObs {
    fn name(&self) -> &'static str {
        self.name
    }

    fn update(&mut self, record: &Record) {
        self.acc.add((self.extract)(record));
    }

    fn report(&self) -> Report {
        Report::Stats(self.acc.report())
    }
}

/// Outbreak onset and duration.
pub struct OutbreakObs {
    n_outbreak_days: usize,
    first_outbreak_day: Option<usize>,
    peak_yield_loss: f64,
    peak_yield_loss_day: Option<usize>,
}

impl OutbreakObs {
    pub fn new() -> Self {
        Self {
            n_outbreak_days: 0,
            first_outbreak_day: None,
            peak_yield_loss: f64::NEG_INFINITY,
            peak_yield_loss_day: None,
        }
    }
}

impl Obs for OutbreakObs {
    fn name(&self) -> &'static str {
        "outbreak"
    }

    fn update(&mut self, record: &Record) {
        let state = &record.state;
        if state.outbreak {
            self.n_outbreak_days += 1;
            self.first_outbreak_day.get_or_insert(state.day);
        }
        if state.yield_loss_pct > self.peak_yield_loss {
            self.peak_yield_loss = state.yield_loss_pct;
            self.peak_yield_loss_day = Some(state.day);
        }
    }

    fn report(&self) -> Report {
        Report::Outbreak(OutbreakReport {
            n_outbreak_days: self.n_outbreak_days,
            first_outbreak_day: self.first_outbreak_day,
            peak_yield_loss_day: self.peak_yield_loss_day,
        })
    }
}

/// State at the last recorded day.
pub struct FinalObs {
    last: Option<FinalReport>,
}

impl Obs for FinalObs {
    fn name(&self) -> &'static str {
        "final"
    }

    fn update(&mut self, record: &Record) {
        let state = &record.state;
        self.last = Some(FinalReport {
            day: state.day,
            population_count: state.population_count,
            yield_loss_pct: state.yield_loss_pct,
            viral_risk_index: state.viral_risk_index,
        });
    }

    fn report(&self) -> Report {
        Report::Final(self.last.clone().unwrap_or(FinalReport {
            day: 0,
            population_count: 0,
            yield_loss_pct: f64::NAN,
            viral_risk_index: f64::NAN,
        }))
    }
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
    n_records: usize,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(MetricObs::new("population_count", |r| {
                r.state.population_count as f64
            })),
            Box::new(MetricObs::new("yield_loss_pct", |r| r.state.yield_loss_pct)),
            Box::new(MetricObs::new("viral_risk_index", |r| r.state.viral_risk_index)),
            Box::new(MetricObs::new("n_agents", |r| r.state.n_agents as f64)),
            Box::new(OutbreakObs::new()),
            Box::new(FinalObs { last: None }),
        ];
        Self {
            obs_ptr_vec,
            n_records: 0,
        }
    }

    /// Feed every record of a trajectory file to the observables.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        while !reader.fill_buf().context("failed to read file")?.is_empty() {
            let record: Record = decode::from_read(&mut reader).context("failed to read record")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&record);
            }
            self.n_records += 1;
        }
        Ok(())
    }

    pub fn n_records(&self) -> usize {
        self.n_records
    }

    pub fn reports(&self) -> Vec<(&'static str, Report)> {
        self.obs_ptr_vec
            .iter()
            .map(|obs| (obs.name(), obs.report()))
            .collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        encode::write_named(&mut writer, &self.reports()).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}
