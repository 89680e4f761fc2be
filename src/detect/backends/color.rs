use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};

const DEFAULT_CELL_SIZE: u32 = 16;
const FLAME_CELL_COVERAGE: f32 = 0.35;
const SMOKE_CELL_COVERAGE: f32 = 0.6;
const MIN_SMOKE_CELLS: usize = 4;

/// CPU colour-heuristic backend.
///
/// Splits the image into square cells, marks cells dominated by flame-coloured
/// or smoke-coloured pixels, and reports each 4-connected group of marked cells
/// as one detection. This is a stand-in so the service runs without a model
/// file; it is not a substitute for a trained detector.
#[derive(Clone, Debug)]
pub struct ColorDetector {
    cell_size: u32,
    fire_label: String,
    smoke_label: String,
}

impl ColorDetector {
    pub fn new() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            fire_label: "fire".to_string(),
            smoke_label: "smoke".to_string(),
        }
    }

    /// Override the label names emitted for the two classes.
    pub fn with_labels(mut self, fire: impl Into<String>, smoke: impl Into<String>) -> Self {
        self.fire_label = fire.into();
        self.smoke_label = smoke.into();
        self
    }

    pub fn with_cell_size(mut self, cell_size: u32) -> Self {
        self.cell_size = cell_size.max(2);
        self
    }

    fn classify_cells(&self, image: &RgbImage) -> CellGrid {
        let cols = image.width().div_ceil(self.cell_size) as usize;
        let rows = image.height().div_ceil(self.cell_size) as usize;
        let mut cells = vec![None; cols * rows];

        for row in 0..rows {
            for col in 0..cols {
                let x0 = col as u32 * self.cell_size;
                let y0 = row as u32 * self.cell_size;
                let x1 = (x0 + self.cell_size).min(image.width());
                let y1 = (y0 + self.cell_size).min(image.height());

                let mut flame = 0u32;
                let mut smoke = 0u32;
                let mut total = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        let pixel = image.get_pixel(x, y);
                        if is_flame_pixel(pixel) {
                            flame += 1;
                        } else if is_smoke_pixel(pixel) {
                            smoke += 1;
                        }
                        total += 1;
                    }
                }
                if total == 0 {
                    continue;
                }
                let flame_cov = flame as f32 / total as f32;
                let smoke_cov = smoke as f32 / total as f32;
                cells[row * cols + col] = if flame_cov >= FLAME_CELL_COVERAGE {
                    Some(Cell {
                        class: CellClass::Flame,
                        coverage: flame_cov,
                    })
                } else if smoke_cov >= SMOKE_CELL_COVERAGE {
                    Some(Cell {
                        class: CellClass::Smoke,
                        coverage: smoke_cov,
                    })
                } else {
                    None
                };
            }
        }

        CellGrid { cols, rows, cells }
    }

    fn to_detection(&self, region: &Region, image: &RgbImage) -> Option<Detection> {
        let (label, confidence) = match region.class {
            CellClass::Flame => (&self.fire_label, 0.5 + 0.5 * region.mean_coverage()),
            CellClass::Smoke => {
                if region.cells < MIN_SMOKE_CELLS {
                    return None;
                }
                (&self.smoke_label, 0.85 * region.mean_coverage())
            }
        };
        let size = self.cell_size as f32;
        let bbox = BoundingBox::new(
            region.min_col as f32 * size,
            region.min_row as f32 * size,
            (region.max_col + 1) as f32 * size,
            (region.max_row + 1) as f32 * size,
        )
        .clamp_to(image.width(), image.height());
        Some(Detection::new(label.clone(), confidence, bbox))
    }
}

impl Default for ColorDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ColorDetector {
    fn name(&self) -> &'static str {
        "color"
    }

    fn infer(&self, image: &RgbImage, threshold: f32) -> Result<Vec<Detection>> {
        let grid = self.classify_cells(image);
        Ok(grid
            .regions()
            .iter()
            .filter_map(|region| self.to_detection(region, image))
            .filter(|det| det.confidence >= threshold)
            .collect())
    }
}

fn is_flame_pixel(pixel: &Rgb<u8>) -> bool {
    let [r, g, b] = pixel.0;
    r >= 180 && r > g && g > b && r.saturating_sub(b) >= 90
}

fn is_smoke_pixel(pixel: &Rgb<u8>) -> bool {
    let [r, g, b] = pixel.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    max - min <= 24 && (110..=225).contains(&max)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CellClass {
    Flame,
    Smoke,
}

#[derive(Clone, Copy, Debug)]
struct Cell {
    class: CellClass,
    coverage: f32,
}

struct CellGrid {
    cols: usize,
    rows: usize,
    cells: Vec<Option<Cell>>,
}

struct Region {
    class: CellClass,
    cells: usize,
    coverage_sum: f32,
    min_col: usize,
    min_row: usize,
    max_col: usize,
    max_row: usize,
}

impl Region {
    fn mean_coverage(&self) -> f32 {
        if self.cells == 0 {
            0.0
        } else {
            self.coverage_sum / self.cells as f32
        }
    }
}

impl CellGrid {
    /// 4-connected components of same-class cells, in raster order of their
    /// first cell.
    fn regions(&self) -> Vec<Region> {
        let mut visited = vec![false; self.cells.len()];
        let mut regions = Vec::new();

        for start in 0..self.cells.len() {
            let Some(seed) = self.cells[start] else {
                continue;
            };
            if visited[start] {
                continue;
            }
            visited[start] = true;

            let mut region = Region {
                class: seed.class,
                cells: 0,
                coverage_sum: 0.0,
                min_col: usize::MAX,
                min_row: usize::MAX,
                max_col: 0,
                max_row: 0,
            };
            let mut stack = vec![start];
            while let Some(idx) = stack.pop() {
                let (col, row) = (idx % self.cols, idx / self.cols);
                if let Some(cell) = self.cells[idx] {
                    region.cells += 1;
                    region.coverage_sum += cell.coverage;
                }
                region.min_col = region.min_col.min(col);
                region.min_row = region.min_row.min(row);
                region.max_col = region.max_col.max(col);
                region.max_row = region.max_row.max(row);

                for (dc, dr) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let nc = col as i64 + dc;
                    let nr = row as i64 + dr;
                    if nc < 0 || nr < 0 || nc >= self.cols as i64 || nr >= self.rows as i64 {
                        continue;
                    }
                    let next = nr as usize * self.cols + nc as usize;
                    if visited[next] {
                        continue;
                    }
                    if matches!(self.cells[next], Some(cell) if cell.class == seed.class) {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }
            regions.push(region);
        }

        regions
    }
}
