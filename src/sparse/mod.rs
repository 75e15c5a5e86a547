/// Sparse matrix times dense vector over blocked, crossbar-routed lanes
pub mod layout;
pub mod units;
pub mod xbar;

use crate::builtin::{transfer, Module};
use crate::config::EngineConfig;
use crate::error::{GemxError, Result};
use crate::isa::SpmvArgs;
use crate::memory::{MatrixDesc, MemoryImage};
use crate::numeric::{activation, Element};

pub use layout::{BlockDesc, Nonzero, SparseGeometry, SparseMatrix, Triplet};
use units::{Aggregator, ColUnit, NnzLoader, Product, RowUnit};
use xbar::Crossbar;

/// Bytes of one descriptor-table entry: u32 nnz, u32 page offset
pub const DESC_BYTES: usize = 8;

pub struct SpmvEngine {
  config: EngineConfig,
  invocations: u64,
}

impl SpmvEngine {
  pub fn new(config: &EngineConfig) -> Self {
    Self {
      config: config.clone(),
      invocations: 0,
    }
  }

  pub fn invocations(&self) -> u64 {
    self.invocations
  }

  fn check(&self, args: &SpmvArgs) -> Result<()> {
    let spmv = &self.config.spmv;
    if args.nnz == 0 {
      return Err(GemxError::EmptyMatrix);
    }
    let blocks = (args.b_blocks as usize) * (args.c_blocks as usize);
    if blocks > spmv.max_blocks {
      return Err(GemxError::CapacityExceeded {
        what: "sparse blocks",
        needed: blocks,
        limit: spmv.max_blocks,
      });
    }
    if blocks == 0 || args.m == 0 || args.k == 0 {
      return Err(GemxError::dimension("sparse operand has no blocks"));
    }
    if args.desc_pages as usize != self.config.desc_pages() {
      return Err(GemxError::dimension(format!(
        "descriptor table of {} pages, engine expects {}",
        args.desc_pages,
        self.config.desc_pages()
      )));
    }
    if args.m as usize > args.c_blocks as usize * spmv.c_block_rows || args.k as usize > args.b_blocks as usize * spmv.b_block_cols {
      return Err(GemxError::dimension(format!(
        "{}x{} does not fit {}x{} blocks",
        args.m, args.k, args.c_blocks, args.b_blocks
      )));
    }
    Ok(())
  }

  /// C = A x B with C cleared first; returns the cycle count
  pub fn execute<E: Element>(&mut self, image: &mut MemoryImage, args: &SpmvArgs) -> Result<u64> {
    self.check(args)?;
    let (m, k) = (args.m as usize, args.k as usize);
    let b = MatrixDesc::vector(args.b as usize, k);
    let c = MatrixDesc::vector(args.c as usize, m);
    b.check_fits::<E>(image, "sparse B")?;
    c.check_fits::<E>(image, "sparse C")?;
    self.invocations += 1;

    let spmv = self.config.spmv.clone();
    let (lanes, block_rows, block_cols) = (spmv.lanes, spmv.c_block_rows, spmv.b_block_cols);
    let (b_blocks, c_blocks) = (args.b_blocks as usize, args.c_blocks as usize);
    let a_page = args.a as usize;
    let entries_page = a_page + args.desc_pages as usize;

    let descs = (0..b_blocks * c_blocks)
      .map(|index| BlockDesc::read(image, a_page, index))
      .collect::<Result<Vec<_>>>()?;
    let stored: u64 = descs.iter().map(|d| d.nnz as u64).sum();
    if stored != args.nnz as u64 {
      return Err(GemxError::format(format!(
        "descriptor table holds {} nonzeros, instruction declares {}",
        stored, args.nnz
      )));
    }

    let vector: Vec<E> = (0..k).map(|i| b.get(image, i, 0)).collect::<Result<_>>()?;
    for row in 0..m {
      c.set(image, row, 0, E::default())?;
    }

    let mut cycles = 0u64;
    for bb in 0..b_blocks {
      let banks: Vec<Vec<E>> = (0..lanes)
        .map(|j| {
          (0..block_cols / lanes)
            .map(|o| vector.get(bb * block_cols + o * lanes + j).copied().unwrap_or_default())
            .collect()
        })
        .collect();
      for cb in 0..c_blocks {
        let desc = descs[bb * c_blocks + cb];
        if desc.nnz == 0 {
          continue;
        }
        let entries = layout::read_entries::<E>(image, entries_page, desc)?;
        if let Some(nz) = entries.iter().find(|nz| nz.row as usize >= block_rows || nz.col as usize >= block_cols) {
          return Err(GemxError::dimension(format!(
            "block ({}, {}) entry at ({}, {}) outside {}x{}",
            bb, cb, nz.row, nz.col, block_rows, block_cols
          )));
        }
        let first_row = cb * block_rows;
        let rows = block_rows.min(m.saturating_sub(first_row));
        let mut cache = vec![E::Acc::default(); block_rows];
        for (r, slot) in cache.iter_mut().take(rows).enumerate() {
          *slot = c.get::<E>(image, first_row + r, 0)?.widen();
        }
        log::debug!("spmv block ({}, {}): {} nonzeros", bb, cb, desc.nnz);
        let (cache, block_cycles) = self.run_block((bb, cb), entries, banks.clone(), cache)?;
        cycles += block_cycles;
        for (r, acc) in cache.into_iter().take(rows).enumerate() {
          c.set(image, first_row + r, 0, E::narrow(acc))?;
        }
      }
    }

    if let Some(act) = args.act() {
      for row in 0..m {
        let value = c.get::<E>(image, row, 0)?;
        c.set(image, row, 0, E::narrow(activation::<E>(value.widen(), act)))?;
      }
    }
    Ok(cycles)
  }

  /// Pump one block through loader, column crossbar, vector banks, row crossbar, group
  /// interleave, row-run accumulators and the output cache until every stage reports done
  fn run_block<E: Element>(
    &self,
    block: (usize, usize),
    entries: Vec<Nonzero<E>>,
    banks: Vec<Vec<E>>,
    cache: Vec<E::Acc>,
  ) -> Result<(Vec<E::Acc>, u64)> {
    let spmv = &self.config.spmv;
    let (lanes, groups, depth) = (spmv.lanes, spmv.mac_groups, spmv.fifo_depth);

    let mut loader = NnzLoader::new(entries, lanes, depth);
    let mut col_xbar = Crossbar::new("col_xbar", lanes, lanes, depth, move |nz: &Nonzero<E>| nz.col as usize % lanes);
    let mut col_units: Vec<ColUnit<E>> = banks
      .into_iter()
      .enumerate()
      .map(|(j, bank)| ColUnit::new(j, lanes, bank, depth))
      .collect();
    let mut row_xbar = Crossbar::new("row_xbar", lanes, lanes, depth, move |p: &Product<E>| p.row as usize % lanes);
    let mut interleave: Vec<Crossbar<Product<E>>> = (0..lanes)
      .map(|j| {
        Crossbar::new(format!("row_interleave{}", j), 1, groups, depth, move |p: &Product<E>| {
          (p.row as usize / lanes) % groups
        })
      })
      .collect();
    let mut row_units: Vec<RowUnit<E>> = (0..lanes)
      .flat_map(|j| (0..groups).map(move |g| RowUnit::new(j, g, depth)))
      .collect();
    let mut aggregator = Aggregator::<E>::new(cache, lanes * groups, depth);

    let stall_window = 16 * (depth * (lanes * groups + 4)) as u64 + 64;
    let mut cycles = 0u64;
    let mut idle = 0u64;
    let mut last_progress = 0u64;

    while !aggregator.is_finished() {
      aggregator.run();
      row_units.iter_mut().for_each(Module::run);
      interleave.iter_mut().for_each(Module::run);
      row_xbar.run();
      col_units.iter_mut().for_each(Module::run);
      col_xbar.run();
      loader.run();

      for (i, unit) in row_units.iter_mut().enumerate() {
        transfer(&mut unit.output, &mut aggregator.inputs[i]);
      }
      for (j, x) in interleave.iter_mut().enumerate() {
        for g in 0..groups {
          transfer(&mut x.outputs[g], &mut row_units[j * groups + g].input);
        }
      }
      for j in 0..lanes {
        transfer(&mut row_xbar.outputs[j], &mut interleave[j].inputs[0]);
        transfer(&mut col_units[j].output, &mut row_xbar.inputs[j]);
        transfer(&mut col_xbar.outputs[j], &mut col_units[j].input);
        transfer(&mut loader.outputs[j], &mut col_xbar.inputs[j]);
      }

      cycles += 1;
      let finished = [col_xbar.is_finished(), row_xbar.is_finished()]
        .into_iter()
        .chain(interleave.iter().map(Crossbar::is_finished))
        .filter(|f| *f)
        .count() as u64;
      let progress = loader.loaded() as u64
        + col_xbar.routed()
        + row_xbar.routed()
        + interleave.iter().map(Crossbar::routed).sum::<u64>()
        + aggregator.sums()
        + finished;
      if progress == last_progress {
        idle += 1;
        if idle > stall_window {
          return Err(GemxError::Stalled {
            stage: format!("spmv block ({}, {})", block.0, block.1),
            cycles,
          });
        }
      } else {
        idle = 0;
        last_progress = progress;
      }
    }
    Ok((aggregator.into_cache(), cycles))
  }
}
