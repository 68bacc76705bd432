//! Field lattice: crop types, damage and neighborhood queries.

use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// Upper bound of a cell's damage accumulator (percent).
pub const MAX_DAMAGE: f64 = 100.0;

/// Number of marigold rings planted by [`Layout::Perimeter`].
const PERIMETER_WIDTH: usize = 2;

/// What is planted on a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CropType {
    /// Commercial crop, counted in the yield.
    Tomato,
    /// Trap crop attracting thrips away from the tomatoes.
    Marigold,
    /// Unplanted field margin.
    Boundary,
}

impl CropType {
    /// Whether the cell holds plants that can be damaged.
    pub fn is_crop(self) -> bool {
        self != CropType::Boundary
    }
}

/// Planting pattern used to fill a new field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Marigold rows interleaved with tomato rows.
    Intercropping,
    /// Marigold border around a tomato core.
    Perimeter,
    /// Tomato only.
    Monoculture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cell {
    crop: CropType,
    damage: f64,
    exposed: bool,
}

/// Read-only view of a single cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellInfo {
    pub x: usize,
    pub y: usize,
    pub crop: CropType,
    /// Accumulated damage in `[0, 100]`.
    pub damage: f64,
    /// Cell lies on the outermost row or column.
    pub is_edge: bool,
    /// A viral shock has hit this cell at least once.
    pub exposed: bool,
}

impl CellInfo {
    pub fn total_loss(&self) -> bool {
        self.damage >= MAX_DAMAGE
    }
}

/// Fixed-size field of `width x height` cells stored row-major.
///
/// Neighborhoods use the Chebyshev metric (Moore neighborhood) and never
/// wrap around the field borders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// Create a field where every cell holds `crop`.
    pub fn new(width: usize, height: usize, crop: CropType) -> Result<Self, SimError> {
        if width == 0 || height == 0 {
            return Err(SimError::EmptyGrid);
        }
        let cell = Cell {
            crop,
            damage: 0.0,
            exposed: false,
        };
        Ok(Self {
            width,
            height,
            cells: vec![cell; width * height],
        })
    }

    /// Create a field planted according to `layout`.
    ///
    /// The outermost `margin` rings are left unplanted afterwards.
    pub fn with_layout(
        width: usize,
        height: usize,
        layout: Layout,
        trap_crop_ratio: f64,
        margin: usize,
    ) -> Result<Self, SimError> {
        let mut grid = Self::new(width, height, CropType::Tomato)?;

        let row_freq = if trap_crop_ratio > 0.0 {
            ((1.0 / trap_crop_ratio).round() as usize).max(1)
        } else {
            usize::MAX
        };

        for y in 0..height {
            for x in 0..width {
                let ring = grid.ring(x, y);
                let is_trap = match layout {
                    Layout::Intercropping => y % row_freq == 0,
                    Layout::Perimeter => ring < PERIMETER_WIDTH,
                    Layout::Monoculture => false,
                };
                let crop = if ring < margin {
                    CropType::Boundary
                } else if is_trap {
                    CropType::Marigold
                } else {
                    CropType::Tomato
                };
                grid.set_crop(x, y, crop)?;
            }
        }

        Ok(grid)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Row-major index of `(x, y)`.
    pub fn index(&self, x: usize, y: usize) -> Result<usize, SimError> {
        if x >= self.width || y >= self.height {
            return Err(SimError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(y * self.width + x)
    }

    /// Coordinates of the cell at row-major index `i_cell`.
    pub fn coords(&self, i_cell: usize) -> (usize, usize) {
        (i_cell % self.width, i_cell / self.width)
    }

    pub fn cell_at(&self, x: usize, y: usize) -> Result<CellInfo, SimError> {
        let cell = &self.cells[self.index(x, y)?];
        Ok(CellInfo {
            x,
            y,
            crop: cell.crop,
            damage: cell.damage,
            is_edge: self.is_edge(x, y),
            exposed: cell.exposed,
        })
    }

    /// Iterate over all cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellInfo> + '_ {
        self.cells.iter().enumerate().map(|(i_cell, cell)| {
            let (x, y) = self.coords(i_cell);
            CellInfo {
                x,
                y,
                crop: cell.crop,
                damage: cell.damage,
                is_edge: self.is_edge(x, y),
                exposed: cell.exposed,
            }
        })
    }

    pub fn set_crop(&mut self, x: usize, y: usize, crop: CropType) -> Result<(), SimError> {
        let i_cell = self.index(x, y)?;
        self.cells[i_cell].crop = crop;
        Ok(())
    }

    /// Add `delta` to the damage of `(x, y)` and return the new value.
    ///
    /// The accumulator is clamped to `[0, 100]`; repeated calls add up.
    pub fn apply_damage(&mut self, x: usize, y: usize, delta: f64) -> Result<f64, SimError> {
        let i_cell = self.index(x, y)?;
        let cell = &mut self.cells[i_cell];
        cell.damage = (cell.damage + delta).clamp(0.0, MAX_DAMAGE);
        Ok(cell.damage)
    }

    /// Flag `(x, y)` as having received a viral shock.
    pub fn mark_exposed(&mut self, x: usize, y: usize) -> Result<(), SimError> {
        let i_cell = self.index(x, y)?;
        self.cells[i_cell].exposed = true;
        Ok(())
    }

    /// In-bounds cells within Chebyshev distance `radius` of `(x, y)`,
    /// excluding `(x, y)` itself, in row-major order.
    pub fn neighbors(
        &self,
        x: usize,
        y: usize,
        radius: usize,
    ) -> Result<Vec<(usize, usize)>, SimError> {
        self.index(x, y)?;

        let x_min = x.saturating_sub(radius);
        let x_max = (x + radius).min(self.width - 1);
        let y_min = y.saturating_sub(radius);
        let y_max = (y + radius).min(self.height - 1);

        let mut out = Vec::with_capacity((x_max - x_min + 1) * (y_max - y_min + 1));
        for ny in y_min..=y_max {
            for nx in x_min..=x_max {
                if (nx, ny) != (x, y) {
                    out.push((nx, ny));
                }
            }
        }
        Ok(out)
    }

    pub fn is_edge(&self, x: usize, y: usize) -> bool {
        self.ring(x, y) == 0
    }

    /// Damage of every cell in row-major order.
    pub fn damage_vec(&self) -> Vec<f64> {
        self.cells.iter().map(|cell| cell.damage).collect()
    }

    // Distance to the closest field border.
    fn ring(&self, x: usize, y: usize) -> usize {
        let dx = x.min(self.width - 1 - x);
        let dy = y.min(self.height - 1 - y);
        dx.min(dy)
    }
}
