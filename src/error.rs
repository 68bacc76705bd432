//! Domain errors raised by the simulation core.

use thiserror::Error;

/// Errors produced by the grid, the step engine and the metrics.
///
/// Application-level failures (files, config parsing) are reported with
/// `anyhow` instead; these variants can be matched on by callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("cell ({x}, {y}) out of bounds: grid is {width}x{height}")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },

    #[error("missing weather data for day {day}")]
    MissingWeatherData { day: usize },

    #[error("invalid scenario {0:?}, expected \"real-data\" or \"forced-outbreak\"")]
    InvalidScenarioConfig(String),

    #[error("grid must have at least one cell")]
    EmptyGrid,

    #[error("cannot compare a {lhs:?} grid with a {rhs:?} grid")]
    GridMismatch {
        lhs: (usize, usize),
        rhs: (usize, usize),
    },
}
