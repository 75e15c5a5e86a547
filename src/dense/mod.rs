/// Dense multiply engine: GEMM, GEMM with fused activation, and GEMV on one systolic array
pub mod array;
pub mod delay;
pub mod feeder;
pub mod plan;
pub mod writer;

use crate::builtin::{transfer, Module};
use crate::config::EngineConfig;
use crate::error::{GemxError, Result};
use crate::isa::{FcnArgs, GemmArgs, GemvArgs};
use crate::memory::{MatrixDesc, MemoryImage};
use crate::numeric::{Activation, Element, PostScale};
use crate::transpose::TileTransposer;

pub use array::{Beat, SystolicArray};
pub use plan::{DenseJob, DensePlan};
use feeder::{OperandTagger, TileReader};
use writer::{BlockWriter, Epilogue};

const STREAM_DEPTH: usize = 4;

/// Operand views and epilogue of one dense instruction
#[derive(Debug, Clone, PartialEq)]
pub struct DenseOp {
  pub a: MatrixDesc,
  pub b: MatrixDesc,
  pub c: MatrixDesc,
  pub x: Option<MatrixDesc>,
  pub post: PostScale,
  pub act: Option<Activation>,
}

impl DenseOp {
  pub fn gemm(args: &GemmArgs) -> Self {
    let (m, k, n) = (args.m as usize, args.k as usize, args.n as usize);
    Self {
      a: MatrixDesc::new(args.a as usize, m, k, args.lda as usize),
      b: MatrixDesc::new(args.b as usize, k, n, args.ldb as usize),
      c: MatrixDesc::new(args.c as usize, m, n, args.ldc as usize),
      // page 0 is the code segment, so offset 0 can never be a bias
      x: (args.x != 0).then(|| MatrixDesc::new(args.x as usize, m, n, args.ldx as usize)),
      post: args.post(),
      act: None,
    }
  }

  pub fn fcn(args: &FcnArgs) -> Self {
    Self {
      act: Some(args.act()),
      ..Self::gemm(&args.gemm)
    }
  }

  pub fn gemv(args: &GemvArgs) -> Self {
    let (m, k) = (args.m as usize, args.k as usize);
    Self {
      a: MatrixDesc::new(args.a as usize, m, k, args.lda as usize),
      b: MatrixDesc::vector(args.b as usize, k),
      c: MatrixDesc::vector(args.c as usize, m),
      x: None,
      post: PostScale::IDENTITY,
      act: None,
    }
  }

  /// (M, K, N)
  pub fn dims(&self) -> (usize, usize, usize) {
    (self.a.rows, self.a.cols, self.b.cols)
  }

  fn check<E: Element>(&self, image: &MemoryImage) -> Result<()> {
    let (m, k, n) = self.dims();
    if m == 0 || k == 0 || n == 0 {
      return Err(GemxError::dimension(format!("empty product {}x{}x{}", m, k, n)));
    }
    if self.b.rows != k || self.c.rows != m || self.c.cols != n {
      return Err(GemxError::dimension("operand shapes disagree"));
    }
    self.a.check_fits::<E>(image, "A")?;
    self.b.check_fits::<E>(image, "B")?;
    self.c.check_fits::<E>(image, "C")?;
    if let Some(x) = &self.x {
      x.check_fits::<E>(image, "X")?;
    }
    Ok(())
  }
}

pub struct DenseEngine {
  config: EngineConfig,
  invocations: u64,
}

impl DenseEngine {
  pub fn new(config: &EngineConfig) -> Self {
    Self {
      config: config.clone(),
      invocations: 0,
    }
  }

  pub fn invocations(&self) -> u64 {
    self.invocations
  }

  pub fn run_gemm<E: Element>(&mut self, image: &mut MemoryImage, args: &GemmArgs) -> Result<u64> {
    self.execute::<E>(image, &DenseOp::gemm(args))
  }

  pub fn run_fcn<E: Element>(&mut self, image: &mut MemoryImage, args: &FcnArgs) -> Result<u64> {
    self.execute::<E>(image, &DenseOp::fcn(args))
  }

  pub fn run_gemv<E: Element>(&mut self, image: &mut MemoryImage, args: &GemvArgs) -> Result<u64> {
    self.execute::<E>(image, &DenseOp::gemv(args))
  }

  /// Stream the product through the array and store C. Returns the cycle count.
  pub fn execute<E: Element>(&mut self, image: &mut MemoryImage, op: &DenseOp) -> Result<u64> {
    op.check::<E>(image)?;
    self.invocations += 1;
    let (m, k, n) = op.dims();
    let plan = DensePlan::from_config(&self.config, m, k, n);
    let w = plan.width;
    log::debug!(
      "dense {}x{}x{}: {} jobs over {}x{} blocks",
      m,
      k,
      n,
      plan.job_count(),
      plan.row_blocks,
      plan.col_blocks
    );

    // operands are latched at dispatch; C may alias an input
    let epilogue = Epilogue {
      bias: op.x.as_ref().map(|x| x.to_rows::<E>(image)).transpose()?,
      post: op.post,
      act: op.act,
    };
    let mut read_a = TileReader::new("read_a", w, op.a.to_rows::<E>(image)?, plan.a_tiles(), w, self.config.gemm.k_words, STREAM_DEPTH);
    let mut read_b = TileReader::new("read_b", w, op.b.to_rows::<E>(image)?, plan.b_tiles(), plan.k_block, 1, STREAM_DEPTH);
    let mut transposer = TileTransposer::new("a_transposer", w, w, plan.k_block, plan.col_tiles - 1, STREAM_DEPTH);
    let mut tagger = OperandTagger::new("tag_ab", w, plan.k_block, plan.job_count(), STREAM_DEPTH);
    let mut array = SystolicArray::<E>::new("systolic", w);
    let mut writer = BlockWriter::new("write_c", plan.clone(), epilogue);

    let stall_window = 4 * (plan.k_block * plan.col_tiles + w * w) as u64 + 64;
    let mut cycles = 0u64;
    let mut idle = 0u64;
    let mut last_progress = (0u64, 0u64);

    while !writer.is_finished() {
      // back to front so each stage sees last cycle's upstream output
      writer.run();
      array.run();
      tagger.run();
      transposer.run();
      read_b.run();
      read_a.run();

      writer.input = array.output.clone();
      match tagger.output.pop() {
        Some(beat) => array.input.set(beat),
        None => array.input.clear(),
      }
      transfer(&mut transposer.output, &mut tagger.in_a);
      transfer(&mut read_b.output, &mut tagger.in_b);
      transfer(&mut read_a.output, &mut transposer.input);

      while let Some((row, col, word)) = writer.pending.pop_front() {
        op.c.write_word(image, row, col, &word)?;
      }

      cycles += 1;
      let progress = (tagger.beats_sent(), writer.rows_received());
      if progress == last_progress {
        idle += 1;
        if idle > stall_window {
          let stage = if tagger.is_finished() { writer.name() } else { tagger.name() };
          return Err(GemxError::Stalled {
            stage: stage.to_string(),
            cycles,
          });
        }
      } else {
        idle = 0;
        last_progress = progress;
      }
    }

    log::debug!("dense done in {} cycles", cycles);
    Ok(cycles)
  }
}
