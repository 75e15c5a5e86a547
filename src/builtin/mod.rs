pub mod fifo;
pub mod port;

pub use fifo::{transfer, Fifo, Token};
pub use port::Wire;

/// A clocked hardware block. `run` evaluates one cycle; parents call children back-to-front
/// so every stage reads what its upstream produced on the previous cycle.
pub trait Module {
  fn run(&mut self);
  fn name(&self) -> &str;
}
