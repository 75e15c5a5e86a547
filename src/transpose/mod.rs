/// Reformat engine: row-major tiles to column-major or the dense-engine A interleave
pub mod buffer;

pub use buffer::TileTransposer;

use crate::builtin::{transfer, Fifo, Module, Token};
use crate::config::EngineConfig;
use crate::dense::feeder::TileReader;
use crate::error::{GemxError, Result};
use crate::isa::{MatrixFormat, MatrixShape, TranspArgs};
use crate::memory::{MatrixDesc, MemoryImage};
use crate::numeric::Element;
use std::collections::VecDeque;

const STREAM_DEPTH: usize = 4;

/// Destination geometry resolved from the instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
  /// `dst[c][r] = src[r][c]`
  ColMajor,
  /// tiles of `group` rows stored column by column, one tile row per destination row
  Interleaved { group: usize },
}

/// Turns the transposer's column words back into destination coordinates
struct TileStore<E> {
  name: String,
  width: usize,
  layout: Layout,
  tile_rows: usize,
  tile_cols: usize,
  tiles: Vec<(usize, usize)>,
  pos: usize,
  done: bool,

  input: Fifo<Token<Vec<E>>>,
  pending: VecDeque<(usize, usize, Vec<E>)>,
}

impl<E: Element> TileStore<E> {
  fn locate(&self, pos: usize) -> (usize, usize) {
    let row_words = self.tile_rows / self.width;
    let per_tile = self.tile_cols * row_words;
    let (row0, col0) = self.tiles[pos / per_tile];
    let within = pos % per_tile;
    let c = col0 + within / row_words;
    let r = row0 + (within % row_words) * self.width;
    match self.layout {
      Layout::ColMajor => (c, r),
      Layout::Interleaved { group } => (r / group, c * group + r % group),
    }
  }
}

impl<E: Element> Module for TileStore<E> {
  fn run(&mut self) {
    match self.input.pop() {
      Some(Token::Data(word)) => {
        let (row, col) = self.locate(self.pos);
        self.pending.push_back((row, col, word));
        self.pos += 1;
      },
      Some(Token::Done) => self.done = true,
      None => {},
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}

pub struct TranspEngine {
  config: EngineConfig,
  invocations: u64,
}

impl TranspEngine {
  pub fn new(config: &EngineConfig) -> Self {
    Self {
      config: config.clone(),
      invocations: 0,
    }
  }

  pub fn invocations(&self) -> u64 {
    self.invocations
  }

  fn view(shape: &MatrixShape) -> MatrixDesc {
    MatrixDesc::new(shape.offset as usize, shape.rows as usize, shape.cols as usize, shape.ld as usize)
  }

  /// Tile geometry and destination layout, after checking the shapes agree
  fn resolve(&self, args: &TranspArgs) -> Result<(usize, usize, Layout)> {
    let (src, dst) = (&args.src, &args.dst);
    if src.format != MatrixFormat::Rm {
      return Err(GemxError::dimension(format!("transpose source must be row-major, got {:?}", src.format)));
    }
    let w = self.config.image.ddr_width;
    let edge = self.config.transp_edge();
    let (rows, cols) = (src.rows as usize, src.cols as usize);
    let (tile_rows, layout, expect) = match dst.format {
      MatrixFormat::Cm => (edge, Layout::ColMajor, (cols, rows)),
      MatrixFormat::GvA => {
        let group = w * self.config.transp.m_groups;
        (group, Layout::Interleaved { group }, (rows / group, cols.saturating_mul(group)))
      },
      other => {
        return Err(GemxError::dimension(format!("unsupported transpose destination {:?}", other)));
      },
    };
    if rows == 0 || cols == 0 || rows % tile_rows != 0 || cols % edge != 0 {
      return Err(GemxError::dimension(format!(
        "transpose source {}x{} is not a multiple of {}x{} tiles",
        rows, cols, tile_rows, edge
      )));
    }
    if (dst.rows as usize, dst.cols as usize) != expect {
      return Err(GemxError::dimension(format!(
        "transpose destination {}x{} should be {}x{}",
        dst.rows, dst.cols, expect.0, expect.1
      )));
    }
    Ok((tile_rows, edge, layout))
  }

  /// Returns the cycle count
  pub fn execute<E: Element>(&mut self, image: &mut MemoryImage, args: &TranspArgs) -> Result<u64> {
    let (tile_rows, tile_cols, layout) = self.resolve(args)?;
    let (src, dst) = (Self::view(&args.src), Self::view(&args.dst));
    src.check_fits::<E>(image, "transpose source")?;
    dst.check_fits::<E>(image, "transpose destination")?;
    self.invocations += 1;

    let w = self.config.image.ddr_width;
    let tiles: Vec<(usize, usize)> = (0..src.rows / tile_rows)
      .flat_map(|rb| (0..src.cols / tile_cols).map(move |cb| (rb * tile_rows, cb * tile_cols)))
      .collect();
    log::debug!("transpose {}x{} -> {:?} in {} tiles", src.rows, src.cols, layout, tiles.len());

    let mut reader = TileReader::new("read_src", w, src.to_rows::<E>(image)?, tiles.clone(), tile_rows, tile_cols / w, STREAM_DEPTH);
    let mut transposer = TileTransposer::new("transposer", w, tile_rows, tile_cols, 0, STREAM_DEPTH);
    let mut store = TileStore {
      name: "store_dst".to_string(),
      width: w,
      layout,
      tile_rows,
      tile_cols,
      tiles,
      pos: 0,
      done: false,
      input: Fifo::new(STREAM_DEPTH),
      pending: VecDeque::new(),
    };

    let stall_window = 4 * (tile_rows * tile_cols / w) as u64 + 64;
    let mut cycles = 0u64;
    let mut idle = 0u64;
    let mut last_pos = 0;
    while !store.done {
      store.run();
      transposer.run();
      reader.run();
      transfer(&mut transposer.output, &mut store.input);
      transfer(&mut reader.output, &mut transposer.input);
      while let Some((row, col, word)) = store.pending.pop_front() {
        dst.write_word(image, row, col, &word)?;
      }

      cycles += 1;
      if store.pos == last_pos {
        idle += 1;
        if idle > stall_window {
          return Err(GemxError::Stalled {
            stage: transposer.name().to_string(),
            cycles,
          });
        }
      } else {
        idle = 0;
        last_pos = store.pos;
      }
    }
    Ok(cycles)
  }
}
