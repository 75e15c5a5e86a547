/// Per-lane shift registers used to skew operands into the array and deskew results out
use std::collections::VecDeque;

/// Lane `i` delays its value by `delays[i]` cycles
#[derive(Debug, Clone)]
pub struct TriangularDelay<T> {
  lanes: Vec<VecDeque<T>>,
}

impl<T: Clone + Default> TriangularDelay<T> {
  /// Lane `i` delayed by `i` cycles
  pub fn skew(width: usize) -> Self {
    Self::with_delays((0..width).collect())
  }

  /// Lane `i` delayed by `width - 1 - i` cycles
  pub fn deskew(width: usize) -> Self {
    Self::with_delays((0..width).rev().collect())
  }

  pub fn with_delays(delays: Vec<usize>) -> Self {
    let lanes = delays.into_iter().map(|d| (0..d).map(|_| T::default()).collect()).collect();
    Self { lanes }
  }

  pub fn width(&self) -> usize {
    self.lanes.len()
  }

  /// Push one value per lane and return the values leaving each lane this cycle
  pub fn shift(&mut self, input: Vec<T>) -> Vec<T> {
    input
      .into_iter()
      .zip(self.lanes.iter_mut())
      .map(|(value, lane)| {
        lane.push_back(value);
        lane.pop_front().unwrap_or_default()
      })
      .collect()
  }
}
