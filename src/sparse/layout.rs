/// Block partitioning of a sparse matrix and its descriptor-table image layout
use super::DESC_BYTES;
use crate::config::EngineConfig;
use crate::error::{GemxError, Result};
use crate::memory::MemoryImage;
use crate::numeric::Element;
use std::collections::VecDeque;

/// One nonzero addressed within its block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Nonzero<E> {
  pub value: E,
  pub row: u16,
  pub col: u16,
}

impl<E: Element> Nonzero<E> {
  /// value, then u16 row, then u16 col
  pub const BYTES: usize = E::BYTES + 4;
}

/// One nonzero addressed in the whole matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet<E> {
  pub row: usize,
  pub col: usize,
  pub value: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockDesc {
  pub nnz: u32,
  /// pages past the start of the entry area
  pub page_offset: u32,
}

impl BlockDesc {
  pub fn read(image: &MemoryImage, a_page: usize, index: usize) -> Result<Self> {
    let base = image.region_address(a_page) + index * DESC_BYTES;
    Ok(Self {
      nnz: image.read_u32(base)?,
      page_offset: image.read_u32(base + 4)?,
    })
  }

  pub fn write(&self, image: &mut MemoryImage, a_page: usize, index: usize) -> Result<()> {
    let base = image.region_address(a_page) + index * DESC_BYTES;
    image.write_u32(base, self.nnz)?;
    image.write_u32(base + 4, self.page_offset)
  }
}

/// Block counts and padded extents of one sparse operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseGeometry {
  pub m: usize,
  pub k: usize,
  pub block_rows: usize,
  pub block_cols: usize,
  pub c_blocks: usize,
  pub b_blocks: usize,
  pub desc_pages: usize,
}

impl SparseGeometry {
  /// Pads M to whole row units and K to whole bus words, then counts blocks
  pub fn new(config: &EngineConfig, m: usize, k: usize) -> Result<Self> {
    if m == 0 || k == 0 {
      return Err(GemxError::dimension(format!("sparse matrix {}x{} is empty", m, k)));
    }
    let units = config.row_units();
    let w = config.image.ddr_width;
    let m = m.div_ceil(units) * units;
    let k = k.div_ceil(w) * w;
    let block_rows = config.spmv.c_block_rows;
    let block_cols = config.spmv.b_block_cols;
    let geometry = Self {
      m,
      k,
      block_rows,
      block_cols,
      c_blocks: m.div_ceil(block_rows),
      b_blocks: k.div_ceil(block_cols),
      desc_pages: config.desc_pages(),
    };
    let blocks = geometry.c_blocks * geometry.b_blocks;
    if blocks > config.spmv.max_blocks {
      return Err(GemxError::CapacityExceeded {
        what: "sparse blocks",
        needed: blocks,
        limit: config.spmv.max_blocks,
      });
    }
    Ok(geometry)
  }

  pub fn block_count(&self) -> usize {
    self.c_blocks * self.b_blocks
  }

  /// B blocks are outermost so one vector block is loaded once for every C block
  pub fn block_index(&self, bb: usize, cb: usize) -> usize {
    bb * self.c_blocks + cb
  }
}

/// A partitioned sparse operand ready to be laid out in the image
#[derive(Debug, Clone)]
pub struct SparseMatrix<E> {
  pub geometry: SparseGeometry,
  pub blocks: Vec<Vec<Nonzero<E>>>,
}

impl<E: Element> SparseMatrix<E> {
  /// Split into blocks, pad each block to whole beats of `lanes` nonzeros, and interleave
  /// rows across row units with runs of at most `row_break` nonzeros per unit
  pub fn partition(config: &EngineConfig, m: usize, k: usize, triplets: &[Triplet<E>]) -> Result<Self> {
    if triplets.is_empty() {
      return Err(GemxError::EmptyMatrix);
    }
    let geometry = SparseGeometry::new(config, m, k)?;
    let mut blocks: Vec<Vec<Nonzero<E>>> = vec![Vec::new(); geometry.block_count()];
    for t in triplets {
      if t.row >= m || t.col >= k {
        return Err(GemxError::dimension(format!(
          "nonzero at ({}, {}) outside {}x{} matrix",
          t.row, t.col, m, k
        )));
      }
      let (cb, bb) = (t.row / geometry.block_rows, t.col / geometry.block_cols);
      blocks[geometry.block_index(bb, cb)].push(Nonzero {
        value: t.value,
        row: (t.row % geometry.block_rows) as u16,
        col: (t.col % geometry.block_cols) as u16,
      });
    }

    let lanes = config.spmv.lanes;
    let units = config.row_units();
    let row_break = config.spmv.row_break;
    for block in blocks.iter_mut().filter(|b| !b.is_empty()) {
      block.resize(block.len().div_ceil(lanes) * lanes, Nonzero::default());
      let mut queues: Vec<VecDeque<Nonzero<E>>> = vec![VecDeque::new(); units];
      for nz in block.drain(..) {
        queues[nz.row as usize % units].push_back(nz);
      }
      while queues.iter().any(|q| !q.is_empty()) {
        for queue in queues.iter_mut() {
          let take = row_break.min(queue.len());
          block.extend(queue.drain(..take));
        }
      }
    }
    Ok(Self { geometry, blocks })
  }

  /// Stored nonzeros including padding
  pub fn nnz(&self) -> usize {
    self.blocks.iter().map(Vec::len).sum()
  }

  fn block_pages(&self, page_size: usize) -> impl Iterator<Item = usize> + '_ {
    self.blocks.iter().map(move |b| (b.len() * Nonzero::<E>::BYTES).div_ceil(page_size))
  }

  /// Descriptor pages plus every page-aligned block
  pub fn total_pages(&self, page_size: usize) -> usize {
    self.geometry.desc_pages + self.block_pages(page_size).sum::<usize>()
  }

  pub fn write(&self, image: &mut MemoryImage, a_page: usize) -> Result<()> {
    let entries_page = a_page + self.geometry.desc_pages;
    let pages: Vec<usize> = self.block_pages(image.page_size()).collect();
    let mut page_offset = 0;
    for (index, (block, pages)) in self.blocks.iter().zip(pages).enumerate() {
      let desc = BlockDesc {
        nnz: block.len() as u32,
        page_offset: page_offset as u32,
      };
      desc.write(image, a_page, index)?;
      write_entries(image, entries_page + page_offset, block)?;
      page_offset += pages;
    }
    log::debug!(
      "sparse layout: {} blocks, {} stored nonzeros, {} entry pages",
      self.blocks.len(),
      self.nnz(),
      page_offset
    );
    Ok(())
  }

  /// Stored nonzeros back in matrix coordinates, padding dropped
  pub fn triplets(&self) -> Vec<Triplet<E>> {
    let g = &self.geometry;
    let mut out = Vec::new();
    for bb in 0..g.b_blocks {
      for cb in 0..g.c_blocks {
        for nz in &self.blocks[g.block_index(bb, cb)] {
          if nz.value != E::default() {
            out.push(Triplet {
              row: cb * g.block_rows + nz.row as usize,
              col: bb * g.block_cols + nz.col as usize,
              value: nz.value,
            });
          }
        }
      }
    }
    out
  }
}

fn write_entries<E: Element>(image: &mut MemoryImage, page: usize, entries: &[Nonzero<E>]) -> Result<()> {
  let base = image.region_address(page);
  for (i, nz) in entries.iter().enumerate() {
    let at = base + i * Nonzero::<E>::BYTES;
    image.write(at, nz.value)?;
    image.write_u16(at + E::BYTES, nz.row)?;
    image.write_u16(at + E::BYTES + 2, nz.col)?;
  }
  Ok(())
}

/// Entries of the block a descriptor points at
pub fn read_entries<E: Element>(image: &MemoryImage, entries_page: usize, desc: BlockDesc) -> Result<Vec<Nonzero<E>>> {
  let base = image.region_address(entries_page + desc.page_offset as usize);
  (0..desc.nnz as usize)
    .map(|i| {
      let at = base + i * Nonzero::<E>::BYTES;
      Ok(Nonzero {
        value: image.read(at)?,
        row: image.read_u16(at + E::BYTES)?,
        col: image.read_u16(at + E::BYTES + 2)?,
      })
    })
    .collect()
}
