pub mod consumer;
pub mod engine;

pub use consumer::OptimizationConsumer;
pub use engine::{OptimizationEngine, OptimizationInput};
