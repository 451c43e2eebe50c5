//! Blocked square matrix multiply
//!
//! C = A x B over `n x n` matrices, computed `rows_per_step` rows at a
//! time. Each step ends at a row boundary, so a suspended multiply resumes
//! at the first row it has not finished.

use crate::workload::{Step, Workload};
use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Loop,
    Finish,
}

#[derive(Debug)]
pub struct MatMul {
    n: usize,
    rows_per_step: usize,
    a: Vec<f32>,
    b: Vec<f32>,
    c: Vec<f32>,
    next_row: usize,
    phase: Phase,
}

impl MatMul {
    pub fn new(n: usize, rows_per_step: usize) -> Self {
        Self {
            n,
            rows_per_step,
            a: Vec::new(),
            b: Vec::new(),
            c: Vec::new(),
            next_row: 0,
            phase: Phase::Init,
        }
    }

    pub fn result(&self) -> &[f32] {
        &self.c
    }

    pub fn checksum(&self) -> f64 {
        self.c.iter().map(|&v| v as f64).sum()
    }

    fn input(i: usize, j: usize) -> (f32, f32) {
        (((i + j) % 5) as f32, ((i * j) % 3) as f32)
    }

    fn multiply_row(&mut self, i: usize) {
        let n = self.n;
        for j in 0..n {
            let mut acc = 0.0f32;
            for k in 0..n {
                acc += self.a[i * n + k] * self.b[k * n + j];
            }
            self.c[i * n + j] = acc;
        }
    }
}

impl Workload for MatMul {
    fn name(&self) -> &str {
        "matmul"
    }

    fn setup(&mut self) -> Result<()> {
        if self.n == 0 || self.rows_per_step == 0 {
            bail!("matrix size and rows per step must be non-zero");
        }
        let n = self.n;
        self.a = vec![0.0; n * n];
        self.b = vec![0.0; n * n];
        self.c = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let (a, b) = Self::input(i, j);
                self.a[i * n + j] = a;
                self.b[i * n + j] = b;
            }
        }
        self.phase = Phase::Loop;
        Ok(())
    }

    fn step(&mut self) -> Step {
        match self.phase {
            Phase::Init => Step::Fault("stepped before setup".to_string()),
            Phase::Loop => {
                let end = (self.next_row + self.rows_per_step).min(self.n);
                for i in self.next_row..end {
                    self.multiply_row(i);
                }
                self.next_row = end;
                if self.next_row == self.n {
                    self.phase = Phase::Finish;
                    Step::Done
                } else {
                    Step::Continue
                }
            }
            Phase::Finish => Step::Done,
        }
    }

    fn teardown(&mut self) {
        self.a = Vec::new();
        self.b = Vec::new();
    }

    fn summary(&self) -> Option<String> {
        Some(format!(
            "{}x{} rows {}/{} checksum {:.1}",
            self.n,
            self.n,
            self.next_row,
            self.n,
            self.checksum()
        ))
    }
}
