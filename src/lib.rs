pub mod builtin;
pub mod config;
pub mod dense;
pub mod dispatch;
pub mod error;
pub mod isa;
pub mod memory;
pub mod numeric;
pub mod program;
pub mod simulator;
pub mod sparse;
pub mod transpose;

pub use error::{GemxError, Result};
pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::utils::log;
