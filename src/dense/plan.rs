/// Blocking of a dense product into array jobs
use crate::config::EngineConfig;

/// One array pass: a `width x width` output tile reduced over one K block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseJob {
  pub rb: usize,
  pub cb: usize,
  pub ti: usize,
  pub kb: usize,
  pub tj: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensePlan {
  pub width: usize,
  pub m: usize,
  pub k: usize,
  pub n: usize,
  pub row_block: usize,
  pub col_block: usize,
  pub k_block: usize,
  pub row_tiles: usize,
  /// column tiles that carry valid output; a vector product only needs one
  pub col_tiles: usize,
  pub row_blocks: usize,
  pub col_blocks: usize,
  pub k_blocks: usize,
}

impl DensePlan {
  pub fn new(width: usize, m: usize, k: usize, n: usize, row_words: usize, col_words: usize, k_words: usize) -> Self {
    let row_block = width * row_words;
    let col_block = width * col_words;
    let k_block = width * k_words;
    Self {
      width,
      m,
      k,
      n,
      row_block,
      col_block,
      k_block,
      row_tiles: row_words,
      col_tiles: col_words.min(n.div_ceil(width)),
      row_blocks: m.div_ceil(row_block),
      col_blocks: n.div_ceil(col_block),
      k_blocks: k.div_ceil(k_block),
    }
  }

  pub fn from_config(config: &EngineConfig, m: usize, k: usize, n: usize) -> Self {
    let g = &config.gemm;
    Self::new(config.image.ddr_width, m, k, n, g.row_words, g.col_words, g.k_words)
  }

  /// Row blocks outermost, then column blocks; inside a block the tile row, the K block
  /// and finally the tile column, so an A tile is reused across one whole row of B tiles
  pub fn jobs(&self) -> Vec<DenseJob> {
    let mut jobs = Vec::with_capacity(self.job_count());
    for rb in 0..self.row_blocks {
      for cb in 0..self.col_blocks {
        for ti in 0..self.row_tiles {
          for kb in 0..self.k_blocks {
            for tj in 0..self.col_tiles {
              jobs.push(DenseJob { rb, cb, ti, kb, tj });
            }
          }
        }
      }
    }
    jobs
  }

  pub fn job_count(&self) -> usize {
    self.row_blocks * self.col_blocks * self.row_tiles * self.k_blocks * self.col_tiles
  }

  /// Origins of the A tiles in stream order, each covering `width` rows and one K block
  pub fn a_tiles(&self) -> Vec<(usize, usize)> {
    let mut tiles = Vec::new();
    for rb in 0..self.row_blocks {
      for _cb in 0..self.col_blocks {
        for ti in 0..self.row_tiles {
          for kb in 0..self.k_blocks {
            tiles.push((rb * self.row_block + ti * self.width, kb * self.k_block));
          }
        }
      }
    }
    tiles
  }

  /// Origins of the B tiles in job order, each covering one K block and `width` columns
  pub fn b_tiles(&self) -> Vec<(usize, usize)> {
    self
      .jobs()
      .into_iter()
      .map(|job| (job.kb * self.k_block, job.cb * self.col_block + job.tj * self.width))
      .collect()
  }

  pub fn closes_block(&self, job: &DenseJob) -> bool {
    job.ti + 1 == self.row_tiles && job.kb + 1 == self.k_blocks && job.tj + 1 == self.col_tiles
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_job_order_and_counts() {
    let plan = DensePlan::new(16, 32, 32, 32, 2, 2, 1);
    assert_eq!(plan.job_count(), 8);
    let jobs = plan.jobs();
    assert_eq!(jobs[1], DenseJob { rb: 0, cb: 0, ti: 0, kb: 0, tj: 1 });
    assert_eq!(jobs[2], DenseJob { rb: 0, cb: 0, ti: 0, kb: 1, tj: 0 });
    assert!(plan.closes_block(&jobs[7]));
    assert_eq!(plan.a_tiles(), vec![(0, 0), (0, 16), (16, 0), (16, 16)]);
  }

  #[test]
  fn test_vector_uses_one_column_tile() {
    let plan = DensePlan::new(16, 32, 16, 1, 2, 2, 1);
    assert_eq!(plan.col_tiles, 1);
    assert_eq!(plan.col_blocks, 1);
    assert_eq!(plan.job_count(), 2);
  }
}
