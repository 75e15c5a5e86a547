/// Sparse pipeline stages: nonzero loader, vector lookup, row-run accumulation, output cache
use super::layout::Nonzero;
use crate::builtin::{Fifo, Module, Token};
use crate::numeric::Element;

/// Matrix value paired with its vector operand, on its way to the owning row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Product<E> {
  pub a: E,
  pub b: E,
  pub row: u16,
}

/// A finished row run
pub type RowSum<E> = (u16, <E as Element>::Acc);

/// Deals one block's nonzeros to the lanes, nonzero `i` to lane `i % lanes`
pub struct NnzLoader<E> {
  entries: Vec<Nonzero<E>>,
  pos: usize,
  done: Vec<bool>,

  pub outputs: Vec<Fifo<Token<Nonzero<E>>>>,
}

impl<E: Element> NnzLoader<E> {
  pub fn new(entries: Vec<Nonzero<E>>, lanes: usize, depth: usize) -> Self {
    Self {
      entries,
      pos: 0,
      done: vec![false; lanes],
      outputs: (0..lanes).map(|_| Fifo::new(depth)).collect(),
    }
  }

  pub fn loaded(&self) -> usize {
    self.pos
  }
}

impl<E: Element> Module for NnzLoader<E> {
  fn run(&mut self) {
    let lanes = self.outputs.len();
    for _ in 0..lanes {
      let Some(nz) = self.entries.get(self.pos) else {
        break;
      };
      let lane = self.pos % lanes;
      if self.outputs[lane].push(Token::Data(*nz)).is_err() {
        break;
      }
      self.pos += 1;
    }
    if self.pos == self.entries.len() {
      for (lane, done) in self.done.iter_mut().enumerate() {
        if !*done && self.outputs[lane].push(Token::Done).is_ok() {
          *done = true;
        }
      }
    }
  }

  fn name(&self) -> &str {
    "nnz_loader"
  }
}

/// Holds one bank of the vector block: column `c` lives in bank `c % lanes` at `c / lanes`
pub struct ColUnit<E> {
  name: String,
  lanes: usize,
  bank: Vec<E>,
  finished: bool,

  pub input: Fifo<Token<Nonzero<E>>>,
  pub output: Fifo<Token<Product<E>>>,
}

impl<E: Element> ColUnit<E> {
  pub fn new(index: usize, lanes: usize, bank: Vec<E>, depth: usize) -> Self {
    Self {
      name: format!("col_unit{}", index),
      lanes,
      bank,
      finished: false,
      input: Fifo::new(depth),
      output: Fifo::new(depth),
    }
  }
}

impl<E: Element> Module for ColUnit<E> {
  fn run(&mut self) {
    if self.output.is_full() || self.finished {
      return;
    }
    match self.input.pop() {
      Some(Token::Data(nz)) => {
        let b = self.bank.get(nz.col as usize / self.lanes).copied().unwrap_or_default();
        let _ = self.output.push(Token::Data(Product {
          a: nz.value,
          b,
          row: nz.row,
        }));
      },
      Some(Token::Done) => {
        let _ = self.output.push(Token::Done);
        self.finished = true;
      },
      None => {},
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Accumulates consecutive products of one row and emits the sum when the row changes
pub struct RowUnit<E: Element> {
  name: String,
  held: Option<RowSum<E>>,
  finished: bool,

  pub input: Fifo<Token<Product<E>>>,
  pub output: Fifo<Token<RowSum<E>>>,
}

impl<E: Element> RowUnit<E> {
  pub fn new(bank: usize, group: usize, depth: usize) -> Self {
    Self {
      name: format!("row_unit{}_{}", bank, group),
      held: None,
      finished: false,
      input: Fifo::new(depth),
      output: Fifo::new(depth),
    }
  }
}

impl<E: Element> Module for RowUnit<E> {
  fn run(&mut self) {
    if self.output.is_full() || self.finished {
      return;
    }
    match self.input.peek() {
      Some(Token::Data(_)) => {
        if let Some(Token::Data(p)) = self.input.pop() {
          let product = E::mul_wide(p.a, p.b);
          let same_row = matches!(self.held, Some((row, _)) if row == p.row);
          if same_row {
            if let Some((_, acc)) = self.held.as_mut() {
              *acc += product;
            }
          } else if let Some(run) = self.held.replace((p.row, product)) {
            let _ = self.output.push(Token::Data(run));
          }
        }
      },
      Some(Token::Done) => match self.held.take() {
        // flush the open run first, the done token goes out next cycle
        Some(run) => {
          let _ = self.output.push(Token::Data(run));
        },
        None => {
          self.input.pop();
          let _ = self.output.push(Token::Done);
          self.finished = true;
        },
      },
      None => {},
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Output-row cache of one C block, fed by every row unit
pub struct Aggregator<E: Element> {
  cache: Vec<E::Acc>,
  done: Vec<bool>,
  sums: u64,

  pub inputs: Vec<Fifo<Token<RowSum<E>>>>,
}

impl<E: Element> Aggregator<E> {
  pub fn new(cache: Vec<E::Acc>, units: usize, depth: usize) -> Self {
    Self {
      cache,
      done: vec![false; units],
      sums: 0,
      inputs: (0..units).map(|_| Fifo::new(depth)).collect(),
    }
  }

  pub fn is_finished(&self) -> bool {
    self.done.iter().all(|d| *d)
  }

  pub fn sums(&self) -> u64 {
    self.sums
  }

  pub fn into_cache(self) -> Vec<E::Acc> {
    self.cache
  }
}

impl<E: Element> Module for Aggregator<E> {
  fn run(&mut self) {
    for (input, done) in self.inputs.iter_mut().zip(self.done.iter_mut()) {
      match input.pop() {
        Some(Token::Data((row, acc))) => {
          if let Some(slot) = self.cache.get_mut(row as usize) {
            *slot += acc;
          }
          self.sums += 1;
        },
        Some(Token::Done) => *done = true,
        None => {},
      }
    }
  }

  fn name(&self) -> &str {
    "aggregator"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn product(row: u16, a: i32, b: i32) -> Token<Product<i32>> {
    Token::Data(Product { a, b, row })
  }

  #[test]
  fn test_row_unit_flushes_on_row_change() {
    let mut unit = RowUnit::<i32>::new(0, 0, 8);
    for tok in [product(3, 2, 5), product(3, 1, 1), product(7, 4, 4), product(3, 1, 2), Token::Done] {
      unit.input.push(tok).unwrap();
    }
    for _ in 0..8 {
      unit.run();
    }
    let out: Vec<_> = std::iter::from_fn(|| unit.output.pop()).collect();
    assert_eq!(
      out,
      vec![Token::Data((3, 11)), Token::Data((7, 16)), Token::Data((3, 2)), Token::Done]
    );
  }

  #[test]
  fn test_col_unit_bank_lookup() {
    // lanes = 2, this is bank 1 holding columns 1, 3, 5
    let mut unit = ColUnit::<i32>::new(1, 2, vec![10, 30, 50], 4);
    unit.input.push(Token::Data(Nonzero { value: 2, row: 9, col: 5 })).unwrap();
    unit.run();
    assert_eq!(unit.output.pop(), Some(Token::Data(Product { a: 2, b: 50, row: 9 })));
  }
}
