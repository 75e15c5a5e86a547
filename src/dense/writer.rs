/// Collects array rows into output blocks and applies the fused post-processing
use super::plan::{DenseJob, DensePlan};
use crate::builtin::{Module, Wire};
use crate::numeric::{post_process, Activation, Element, PostScale};
use std::collections::VecDeque;

/// Post-processing applied once a block's reduction over K is complete
#[derive(Debug, Clone)]
pub struct Epilogue<E> {
  /// bias rows, already clipped to the output shape
  pub bias: Option<Vec<Vec<E>>>,
  pub post: PostScale,
  pub act: Option<Activation>,
}

impl<E> Default for Epilogue<E> {
  fn default() -> Self {
    Self {
      bias: None,
      post: PostScale::IDENTITY,
      act: None,
    }
  }
}

/// A finished output word: `(row, first col, values)`
pub type WordWrite<E> = (usize, usize, Vec<E>);

pub struct BlockWriter<E: Element> {
  name: String,
  plan: DensePlan,
  jobs: Vec<DenseJob>,
  job_idx: usize,
  row_in_job: usize,
  block: Vec<E::Acc>,
  epilogue: Epilogue<E>,
  rows_received: u64,

  pub input: Wire<Vec<E::Acc>>,
  /// words ready to be stored, in row-block then col-block order
  pub pending: VecDeque<WordWrite<E>>,
}

impl<E: Element> BlockWriter<E> {
  pub fn new(name: impl Into<String>, plan: DensePlan, epilogue: Epilogue<E>) -> Self {
    let jobs = plan.jobs();
    let block = vec![E::Acc::default(); plan.row_block * plan.col_block];
    Self {
      name: name.into(),
      plan,
      jobs,
      job_idx: 0,
      row_in_job: 0,
      block,
      epilogue,
      rows_received: 0,
      input: Wire::default(),
      pending: VecDeque::new(),
    }
  }

  pub fn is_finished(&self) -> bool {
    self.job_idx == self.jobs.len()
  }

  pub fn rows_received(&self) -> u64 {
    self.rows_received
  }

  fn accumulate(&mut self, job: DenseJob, row: Vec<E::Acc>) {
    let w = self.plan.width;
    let r = job.ti * w + self.row_in_job;
    let base = r * self.plan.col_block + job.tj * w;
    for (slot, value) in self.block[base..base + w].iter_mut().zip(row) {
      *slot += value;
    }
  }

  fn finalize(&mut self, job: DenseJob) {
    let plan = &self.plan;
    let w = plan.width;
    for r in 0..plan.row_block {
      let row = job.rb * plan.row_block + r;
      if row >= plan.m {
        break;
      }
      for tj in 0..plan.col_tiles {
        let col = job.cb * plan.col_block + tj * w;
        if col >= plan.n {
          break;
        }
        let valid = w.min(plan.n - col);
        let word: Vec<E> = (0..valid)
          .map(|j| {
            let acc = self.block[r * plan.col_block + tj * w + j];
            let bias = self.epilogue.bias.as_ref().map(|x| x[row][col + j]);
            post_process::<E>(acc, bias, self.epilogue.post, self.epilogue.act)
          })
          .collect();
        self.pending.push_back((row, col, word));
      }
    }
    self.block.iter_mut().for_each(|slot| *slot = E::Acc::default());
  }
}

impl<E: Element> Module for BlockWriter<E> {
  fn run(&mut self) {
    let Some(row) = self.input.take() else {
      return;
    };
    let Some(&job) = self.jobs.get(self.job_idx) else {
      log::warn!("{}: row arrived after the last job", self.name);
      return;
    };
    self.rows_received += 1;
    self.accumulate(job, row);
    self.row_in_job += 1;
    if self.row_in_job == self.plan.width {
      self.row_in_job = 0;
      self.job_idx += 1;
      if self.plan.closes_block(&job) {
        self.finalize(job);
      }
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partials_merge_before_epilogue() {
    // one 2x2 block reduced over two K blocks, rescaled by 1/2
    let plan = DensePlan::new(2, 2, 4, 2, 1, 1, 1);
    let epilogue = Epilogue {
      bias: Some(vec![vec![2, 2], vec![2, 2]]),
      post: PostScale::new(1, 1),
      act: None,
    };
    let mut writer = BlockWriter::<i32>::new("wr", plan, epilogue);
    for row in [vec![1i64, 2], vec![3, 4], vec![1, 2], vec![3, 4]] {
      writer.input.set(row);
      writer.run();
    }
    assert!(writer.is_finished());
    let words: Vec<_> = writer.pending.drain(..).collect();
    assert_eq!(words, vec![(0, 0, vec![2, 3]), (1, 0, vec![4, 5])]);
  }
}
