/// Output-stationary systolic array of multiply-accumulate cells
use super::delay::TriangularDelay;
use crate::builtin::{Module, Wire};
use crate::numeric::Element;

/// One column word of A, one row word of B and the job boundary marker
#[derive(Debug, Clone, Default)]
pub struct Beat<E> {
  pub a: Vec<E>,
  pub b: Vec<E>,
  /// first beat of a new output tile; cells hand their accumulator out and restart
  pub flush: bool,
}

impl<E: Element> Beat<E> {
  pub fn bubble(width: usize) -> Self {
    Self {
      a: vec![E::default(); width],
      b: vec![E::default(); width],
      flush: false,
    }
  }

  pub fn final_flush(width: usize) -> Self {
    Self {
      flush: true,
      ..Self::bubble(width)
    }
  }
}

#[derive(Debug, Clone, Default)]
struct ProcessingElement<E: Element> {
  a_in: E,
  b_in: E,
  flush: bool,
  acc: E::Acc,
  /// holds a partial sum that belongs to a real tile
  primed: bool,
}

impl<E: Element> ProcessingElement<E> {
  /// Multiply-accumulate; on a flush the finished sum is returned and accumulation restarts
  fn compute(&mut self) -> Option<E::Acc> {
    let product = E::mul_wide(self.a_in, self.b_in);
    if self.flush {
      let drained = if self.primed { Some(self.acc) } else { None };
      self.acc = product;
      self.primed = true;
      drained
    } else {
      self.acc += product;
      None
    }
  }
}

/// `width x width` grid. A enters from the left skewed by row, B from the top skewed by
/// column; finished rows leave deskewed, one complete row per cycle.
pub struct SystolicArray<E: Element> {
  name: String,
  width: usize,
  pe_grid: Vec<Vec<ProcessingElement<E>>>,
  skew_a: TriangularDelay<(E, bool)>,
  skew_b: TriangularDelay<E>,
  deskew: TriangularDelay<Option<E::Acc>>,

  pub input: Wire<Beat<E>>,
  pub output: Wire<Vec<E::Acc>>,
}

impl<E: Element> SystolicArray<E> {
  pub fn new(name: impl Into<String>, width: usize) -> Self {
    Self {
      name: name.into(),
      width,
      pe_grid: vec![vec![ProcessingElement::default(); width]; width],
      skew_a: TriangularDelay::skew(width),
      skew_b: TriangularDelay::skew(width),
      deskew: TriangularDelay::deskew(width),
      input: Wire::default(),
      output: Wire::default(),
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  fn propagate(&mut self) {
    let w = self.width;
    for row in self.pe_grid.iter_mut() {
      for j in (1..w).rev() {
        row[j].a_in = row[j - 1].a_in;
        row[j].flush = row[j - 1].flush;
      }
    }
    for i in (1..w).rev() {
      for j in 0..w {
        self.pe_grid[i][j].b_in = self.pe_grid[i - 1][j].b_in;
      }
    }
  }

  fn inject(&mut self, beat: Beat<E>) {
    let flush = beat.flush;
    let a_lanes = self.skew_a.shift(beat.a.into_iter().map(|a| (a, flush)).collect());
    let b_lanes = self.skew_b.shift(beat.b);
    for (row, (a, flush)) in self.pe_grid.iter_mut().zip(a_lanes) {
      row[0].a_in = a;
      row[0].flush = flush;
    }
    for (pe, b) in self.pe_grid[0].iter_mut().zip(b_lanes) {
      pe.b_in = b;
    }
  }
}

impl<E: Element> Module for SystolicArray<E> {
  fn run(&mut self) {
    // every cell fires on last cycle's operands
    let mut drained = vec![None; self.width];
    for row in self.pe_grid.iter_mut() {
      for (j, pe) in row.iter_mut().enumerate() {
        if let Some(acc) = pe.compute() {
          drained[j] = Some(acc);
        }
      }
    }

    let aligned = self.deskew.shift(drained);
    if aligned.iter().all(Option::is_some) {
      self.output.set(aligned.into_iter().flatten().collect());
    } else {
      self.output.clear();
    }

    self.propagate();
    let beat = self.input.take().unwrap_or_else(|| Beat::bubble(self.width));
    self.inject(beat);
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Feed one tile (`a` as columns, `b` as rows) followed by a final flush and collect rows
  fn run_tile(width: usize, a_cols: &[Vec<i32>], b_rows: &[Vec<i32>]) -> Vec<Vec<i64>> {
    let mut array = SystolicArray::<i32>::new("sa", width);
    let mut beats: Vec<Beat<i32>> = a_cols
      .iter()
      .zip(b_rows)
      .enumerate()
      .map(|(k, (a, b))| Beat {
        a: a.clone(),
        b: b.clone(),
        flush: k == 0,
      })
      .collect();
    beats.push(Beat::final_flush(width));
    let mut rows = Vec::new();
    let mut feed = beats.into_iter();
    for _ in 0..(a_cols.len() + 4 * width) {
      array.run();
      if let Some(row) = array.output.take() {
        rows.push(row);
      }
      if let Some(beat) = feed.next() {
        array.input.set(beat);
      }
    }
    rows
  }

  #[test]
  fn test_identity_product() {
    // A = [[1,2],[3,4]], B = I
    let a_cols = vec![vec![1, 3], vec![2, 4]];
    let b_rows = vec![vec![1, 0], vec![0, 1]];
    assert_eq!(run_tile(2, &a_cols, &b_rows), vec![vec![1, 2], vec![3, 4]]);
  }

  #[test]
  fn test_rows_emerge_in_order() {
    // 3x3 all-ones times 3x3 counting matrix
    let a_cols = vec![vec![1; 3]; 3];
    let b_rows = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]];
    let rows = run_tile(3, &a_cols, &b_rows);
    assert_eq!(rows, vec![vec![12, 15, 18]; 3]);
  }
}
