//! Two-pass Sobel edge detector
//!
//! Pass one computes the L1 gradient magnitude of a greyscale image, pass
//! two thresholds it into an edge map. Both passes work in bands of
//! `rows_per_step` rows so the detector can be suspended between bands.
//! Border pixels have no full 3x3 neighbourhood and are never edges.

use crate::workload::{Step, Workload};
use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Gradient,
    Threshold,
    Finish,
}

#[derive(Debug)]
pub struct Sobel {
    width: usize,
    height: usize,
    rows_per_step: usize,
    threshold: u16,
    image: Vec<u8>,
    magnitude: Vec<u16>,
    edges: Vec<bool>,
    next_row: usize,
    phase: Phase,
}

impl Sobel {
    /// Detector over a synthetic image with a vertical step edge in the
    /// middle column
    pub fn new(width: usize, height: usize, rows_per_step: usize) -> Self {
        let image = (0..height)
            .flat_map(|_| (0..width).map(move |x| if x < width / 2 { 0 } else { 255 }))
            .collect();
        Self::with_image(width, height, rows_per_step, image)
    }

    pub fn with_image(width: usize, height: usize, rows_per_step: usize, image: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rows_per_step,
            threshold: 128,
            image,
            magnitude: Vec::new(),
            edges: Vec::new(),
            next_row: 0,
            phase: Phase::Init,
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|&&e| e).count()
    }

    fn px(&self, x: usize, y: usize) -> i32 {
        self.image[y * self.width + x] as i32
    }

    fn gradient_row(&mut self, y: usize) {
        if y == 0 || y + 1 >= self.height {
            return;
        }
        for x in 1..self.width.saturating_sub(1) {
            let gx = (self.px(x + 1, y - 1) + 2 * self.px(x + 1, y) + self.px(x + 1, y + 1))
                - (self.px(x - 1, y - 1) + 2 * self.px(x - 1, y) + self.px(x - 1, y + 1));
            let gy = (self.px(x - 1, y + 1) + 2 * self.px(x, y + 1) + self.px(x + 1, y + 1))
                - (self.px(x - 1, y - 1) + 2 * self.px(x, y - 1) + self.px(x + 1, y - 1));
            let mag = (gx.abs() + gy.abs()).min(u16::MAX as i32) as u16;
            self.magnitude[y * self.width + x] = mag;
        }
    }

    fn threshold_row(&mut self, y: usize) {
        let row = y * self.width..(y + 1) * self.width;
        for i in row {
            self.edges[i] = self.magnitude[i] >= self.threshold;
        }
    }

    /// Advance the current pass by one band. Returns true once the pass has
    /// covered every row.
    fn band(&mut self, f: fn(&mut Self, usize)) -> bool {
        let end = (self.next_row + self.rows_per_step).min(self.height);
        for y in self.next_row..end {
            f(self, y);
        }
        self.next_row = end;
        if end == self.height {
            self.next_row = 0;
            true
        } else {
            false
        }
    }
}

impl Workload for Sobel {
    fn name(&self) -> &str {
        "sobel"
    }

    fn setup(&mut self) -> Result<()> {
        if self.width < 3 || self.height < 3 {
            bail!("image must be at least 3x3, got {}x{}", self.width, self.height);
        }
        if self.rows_per_step == 0 {
            bail!("rows per step must be non-zero");
        }
        if self.image.len() != self.width * self.height {
            bail!("image has {} pixels, expected {}", self.image.len(), self.width * self.height);
        }
        self.magnitude = vec![0; self.width * self.height];
        self.edges = vec![false; self.width * self.height];
        self.phase = Phase::Gradient;
        Ok(())
    }

    fn step(&mut self) -> Step {
        match self.phase {
            Phase::Init => Step::Fault("stepped before setup".to_string()),
            Phase::Gradient => {
                if self.band(Self::gradient_row) {
                    self.phase = Phase::Threshold;
                }
                Step::Continue
            }
            Phase::Threshold => {
                if self.band(Self::threshold_row) {
                    self.phase = Phase::Finish;
                    return Step::Done;
                }
                Step::Continue
            }
            Phase::Finish => Step::Done,
        }
    }

    fn teardown(&mut self) {
        self.magnitude = Vec::new();
    }

    fn summary(&self) -> Option<String> {
        Some(format!(
            "{}x{} edges {}",
            self.width,
            self.height,
            self.edge_count()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sobel: &mut Sobel) -> usize {
        sobel.setup().unwrap();
        let mut steps = 0;
        while sobel.step() == Step::Continue {
            steps += 1;
            assert!(steps < 1000);
        }
        steps + 1
    }

    #[test]
    fn test_vertical_edge() {
        let mut sobel = Sobel::new(16, 8, 3);
        let steps = run(&mut sobel);
        // two columns either side of the step, interior rows only
        assert_eq!(sobel.edge_count(), 2 * 6);
        // 3 bands per pass over 8 rows
        assert_eq!(steps, 6);
    }

    #[test]
    fn test_flat_image_has_no_edges() {
        let mut sobel = Sobel::with_image(5, 5, 1, vec![90; 25]);
        run(&mut sobel);
        assert_eq!(sobel.edge_count(), 0);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(Sobel::new(2, 10, 1).setup().is_err());
        assert!(Sobel::with_image(4, 4, 1, vec![0; 3]).setup().is_err());
    }
}
