/// Banked tile buffer that transposes row-major bus words into column words
use crate::builtin::{Fifo, Module, Token};

/// One tile in flight, stored across `width` banks with a rotating bank index so a
/// column read touches every bank exactly once
#[derive(Clone, Debug)]
struct TileBuf<T> {
  banks: Vec<Vec<T>>,
  filled: usize,
}

impl<T: Copy + Default> TileBuf<T> {
  fn new(width: usize, depth: usize) -> Self {
    Self {
      banks: vec![vec![T::default(); depth]; width],
      filled: 0,
    }
  }
}

/// Streams tiles of `rows x cols` elements in as `rows * cols / width` row words and out as
/// `cols * rows / width` column words. With `reuse = n` every tile is emitted `n + 1` times.
/// Two tile buffers alternate so the next tile loads while the current one drains.
pub struct TileTransposer<T> {
  name: String,
  width: usize,
  rows: usize,
  cols: usize,
  reuse: usize,

  pub input: Fifo<Token<Vec<T>>>,
  pub output: Fifo<Token<Vec<T>>>,

  loading: TileBuf<T>,
  draining: Option<TileBuf<T>>,
  read_pos: usize,
  passes_left: usize,
  input_done: bool,
  done_sent: bool,
}

impl<T: Copy + Default> TileTransposer<T> {
  pub fn new(name: impl Into<String>, width: usize, rows: usize, cols: usize, reuse: usize, depth: usize) -> Self {
    Self {
      name: name.into(),
      width,
      rows,
      cols,
      reuse,
      input: Fifo::new(depth),
      output: Fifo::new(depth),
      loading: TileBuf::new(width, rows * cols / width),
      draining: None,
      read_pos: 0,
      passes_left: 0,
      input_done: false,
      done_sent: false,
    }
  }

  fn words_per_tile(&self) -> usize {
    self.rows * self.cols / self.width
  }

  fn write_word(&mut self, word: &[T]) {
    let col_words = self.cols / self.width;
    let r = self.loading.filled / col_words;
    let w = self.loading.filled % col_words;
    let addr = r * col_words + w;
    for (e, value) in word.iter().enumerate() {
      self.loading.banks[(e + r) % self.width][addr] = *value;
    }
    self.loading.filled += 1;
  }

  fn read_word(&self, tile: &TileBuf<T>, pos: usize) -> Vec<T> {
    let row_words = self.rows / self.width;
    let col_words = self.cols / self.width;
    let c = pos / row_words;
    let v = pos % row_words;
    let e = c % self.width;
    let mut word = vec![T::default(); self.width];
    for i in 0..self.width {
      let r = v * self.width + i;
      word[i] = tile.banks[(e + r) % self.width][r * col_words + c / self.width];
    }
    word
  }

  pub fn is_finished(&self) -> bool {
    self.done_sent
  }
}

impl<T: Copy + Default> Module for TileTransposer<T> {
  fn run(&mut self) {
    let per_tile = self.words_per_tile();

    // drain side
    if let Some(tile) = self.draining.take() {
      if !self.output.is_full() {
        let word = self.read_word(&tile, self.read_pos);
        let _ = self.output.push(Token::Data(word));
        self.read_pos += 1;
        if self.read_pos == per_tile {
          self.read_pos = 0;
          if self.passes_left == 0 {
            // buffer freed
          } else {
            self.passes_left -= 1;
            self.draining = Some(tile);
          }
        } else {
          self.draining = Some(tile);
        }
      } else {
        self.draining = Some(tile);
      }
    }

    // swap a complete tile into the drain slot
    if self.draining.is_none() && self.loading.filled == per_tile {
      let fresh = TileBuf::new(self.width, per_tile);
      self.draining = Some(std::mem::replace(&mut self.loading, fresh));
      self.passes_left = self.reuse;
      self.read_pos = 0;
    }

    // load side
    if self.loading.filled < per_tile {
      match self.input.pop() {
        Some(Token::Data(word)) => self.write_word(&word),
        Some(Token::Done) => self.input_done = true,
        None => {},
      }
    }

    if self.input_done && self.draining.is_none() && self.loading.filled == 0 && !self.done_sent {
      if self.output.push(Token::Done).is_ok() {
        self.done_sent = true;
      }
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}
