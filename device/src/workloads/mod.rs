//! Reference workloads

pub mod matmul;
pub mod sobel;
pub mod synthetic;

pub use matmul::MatMul;
pub use sobel::Sobel;
pub use synthetic::{Faulty, Spin, Stall, StallRelease};
