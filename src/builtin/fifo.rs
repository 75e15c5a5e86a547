/// Bounded stage-to-stage channels carrying data and done tokens
use std::collections::VecDeque;

/// Stream element: either a payload or the end-of-stream marker
#[derive(Clone, Debug, PartialEq)]
pub enum Token<T> {
  Data(T),
  Done,
}

/// Bounded FIFO; a full FIFO refuses pushes, which is how backpressure reaches the producer
#[derive(Clone, Debug)]
pub struct Fifo<T> {
  queue: VecDeque<T>,
  depth: usize,
}

impl<T> Fifo<T> {
  pub fn new(depth: usize) -> Self {
    Self {
      queue: VecDeque::with_capacity(depth),
      depth: depth.max(1),
    }
  }

  pub fn is_full(&self) -> bool {
    self.queue.len() >= self.depth
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  /// Push if there is room; hands the item back otherwise
  pub fn push(&mut self, item: T) -> Result<(), T> {
    if self.is_full() {
      Err(item)
    } else {
      self.queue.push_back(item);
      Ok(())
    }
  }

  pub fn pop(&mut self) -> Option<T> {
    self.queue.pop_front()
  }

  pub fn peek(&self) -> Option<&T> {
    self.queue.front()
  }
}

/// Wiring update: move as many items as fit from a stage output into the next stage input.
/// Returns the number of items moved.
pub fn transfer<T>(from: &mut Fifo<T>, to: &mut Fifo<T>) -> usize {
  let mut moved = 0;
  while !to.is_full() {
    match from.pop() {
      Some(item) => {
        // room was checked above
        let _ = to.push(item);
        moved += 1;
      },
      None => break,
    }
  }
  moved
}
