/// Operand readers and the stage that pairs A and B words into array beats
use super::array::Beat;
use crate::builtin::{Fifo, Module, Token};
use crate::numeric::Element;

/// Streams rectangular tiles of a row-major operand as bus words, tile by tile and row
/// by row inside a tile. Elements past the operand edge read as zero.
pub struct TileReader<E: Element> {
  name: String,
  width: usize,
  rows: Vec<Vec<E>>,
  tiles: Vec<(usize, usize)>,
  tile_rows: usize,
  tile_words: usize,
  pos: usize,
  done_sent: bool,

  pub output: Fifo<Token<Vec<E>>>,
}

impl<E: Element> TileReader<E> {
  /// `tiles` holds the (row, col) origin of every tile in emission order
  pub fn new(
    name: impl Into<String>,
    width: usize,
    rows: Vec<Vec<E>>,
    tiles: Vec<(usize, usize)>,
    tile_rows: usize,
    tile_words: usize,
    depth: usize,
  ) -> Self {
    Self {
      name: name.into(),
      width,
      rows,
      tiles,
      tile_rows,
      tile_words,
      pos: 0,
      done_sent: false,
      output: Fifo::new(depth),
    }
  }

  fn words_total(&self) -> usize {
    self.tiles.len() * self.tile_rows * self.tile_words
  }

  fn word_at(&self, pos: usize) -> Vec<E> {
    let per_tile = self.tile_rows * self.tile_words;
    let (row0, col0) = self.tiles[pos / per_tile];
    let within = pos % per_tile;
    let row = row0 + within / self.tile_words;
    let col = col0 + (within % self.tile_words) * self.width;
    let src = self.rows.get(row);
    (col..col + self.width)
      .map(|c| src.and_then(|r| r.get(c)).copied().unwrap_or_default())
      .collect()
  }
}

impl<E: Element> Module for TileReader<E> {
  fn run(&mut self) {
    if self.output.is_full() || self.done_sent {
      return;
    }
    if self.pos < self.words_total() {
      let word = self.word_at(self.pos);
      let _ = self.output.push(Token::Data(word));
      self.pos += 1;
    } else if self.output.push(Token::Done).is_ok() {
      self.done_sent = true;
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Zips the A column stream with the B row stream. The first beat of every job carries
/// the flush marker, and one extra flush after the last job drains the array.
pub struct OperandTagger<E: Element> {
  name: String,
  width: usize,
  beats_per_job: usize,
  total_jobs: usize,
  beat_idx: usize,
  jobs_done: usize,
  final_sent: bool,
  beats_sent: u64,

  pub in_a: Fifo<Token<Vec<E>>>,
  pub in_b: Fifo<Token<Vec<E>>>,
  pub output: Fifo<Beat<E>>,
}

impl<E: Element> OperandTagger<E> {
  pub fn new(name: impl Into<String>, width: usize, beats_per_job: usize, total_jobs: usize, depth: usize) -> Self {
    Self {
      name: name.into(),
      width,
      beats_per_job,
      total_jobs,
      beat_idx: 0,
      jobs_done: 0,
      final_sent: false,
      beats_sent: 0,
      in_a: Fifo::new(depth),
      in_b: Fifo::new(depth),
      output: Fifo::new(depth),
    }
  }

  pub fn beats_sent(&self) -> u64 {
    self.beats_sent
  }

  pub fn is_finished(&self) -> bool {
    self.final_sent
  }
}

impl<E: Element> Module for OperandTagger<E> {
  fn run(&mut self) {
    if self.output.is_full() || self.final_sent {
      return;
    }
    if self.jobs_done == self.total_jobs {
      // trailing end markers are not needed once every job has been paired
      while matches!(self.in_a.peek(), Some(Token::Done)) {
        self.in_a.pop();
      }
      while matches!(self.in_b.peek(), Some(Token::Done)) {
        self.in_b.pop();
      }
      let _ = self.output.push(Beat::final_flush(self.width));
      self.final_sent = true;
      return;
    }
    let ready = matches!(self.in_a.peek(), Some(Token::Data(_))) && matches!(self.in_b.peek(), Some(Token::Data(_)));
    if !ready {
      return;
    }
    if let (Some(Token::Data(a)), Some(Token::Data(b))) = (self.in_a.pop(), self.in_b.pop()) {
      let flush = self.beat_idx == 0;
      let _ = self.output.push(Beat { a, b, flush });
      self.beats_sent += 1;
      self.beat_idx += 1;
      if self.beat_idx == self.beats_per_job {
        self.beat_idx = 0;
        self.jobs_done += 1;
      }
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}
