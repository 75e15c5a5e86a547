/// Split/merge routing network with round-robin arbitration per output
use crate::builtin::{Fifo, Module, Token};

/// Routes every item from `inputs.len()` lanes to the output chosen by `route`. Each output
/// accepts one item per cycle, granting competing inputs in round-robin order; an item
/// whose output is busy waits at the head of its lane.
pub struct Crossbar<T> {
  name: String,
  route: Box<dyn Fn(&T) -> usize>,
  priority: Vec<usize>,
  inputs_done: Vec<bool>,
  outputs_done: Vec<bool>,
  routed: u64,

  pub inputs: Vec<Fifo<Token<T>>>,
  pub outputs: Vec<Fifo<Token<T>>>,
}

impl<T> Crossbar<T> {
  pub fn new(name: impl Into<String>, inputs: usize, outputs: usize, depth: usize, route: impl Fn(&T) -> usize + 'static) -> Self {
    Self {
      name: name.into(),
      route: Box::new(route),
      priority: vec![0; outputs],
      inputs_done: vec![false; inputs],
      outputs_done: vec![false; outputs],
      routed: 0,
      inputs: (0..inputs).map(|_| Fifo::new(depth)).collect(),
      outputs: (0..outputs).map(|_| Fifo::new(depth)).collect(),
    }
  }

  pub fn routed(&self) -> u64 {
    self.routed
  }

  pub fn is_finished(&self) -> bool {
    self.outputs_done.iter().all(|d| *d)
  }

  fn wants(&self, input: usize, output: usize) -> bool {
    match self.inputs[input].peek() {
      Some(Token::Data(item)) => (self.route)(item) % self.outputs.len() == output,
      _ => false,
    }
  }
}

impl<T> Module for Crossbar<T> {
  fn run(&mut self) {
    let lanes = self.inputs.len();
    for out in 0..self.outputs.len() {
      if self.outputs[out].is_full() {
        continue;
      }
      let start = self.priority[out];
      let winner = (0..lanes).map(|i| (start + i) % lanes).find(|&i| self.wants(i, out));
      if let Some(lane) = winner {
        if let Some(tok) = self.inputs[lane].pop() {
          let _ = self.outputs[out].push(tok);
          self.routed += 1;
        }
        self.priority[out] = (lane + 1) % lanes;
      }
    }

    for (lane, input) in self.inputs.iter_mut().enumerate() {
      if matches!(input.peek(), Some(Token::Done)) {
        input.pop();
        self.inputs_done[lane] = true;
      }
    }

    // done fans out only after every input has finished
    if self.inputs_done.iter().all(|d| *d) {
      for (out, done) in self.outputs_done.iter_mut().enumerate() {
        if !*done && self.outputs[out].push(Token::Done).is_ok() {
          *done = true;
        }
      }
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}
