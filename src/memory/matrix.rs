/// Logical matrix views over data-segment regions
use super::image::MemoryImage;
use crate::error::{GemxError, Result};
use crate::numeric::Element;

/// Row-major (rows, cols, ld) view starting at a page; several views may alias one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixDesc {
  pub page: usize,
  pub rows: usize,
  pub cols: usize,
  pub ld: usize,
}

impl MatrixDesc {
  pub fn new(page: usize, rows: usize, cols: usize, ld: usize) -> Self {
    Self { page, rows, cols, ld }
  }

  pub fn vector(page: usize, len: usize) -> Self {
    Self::new(page, len, 1, 1)
  }

  /// Byte offset of `(row, col)`; arithmetic overflow is an out-of-range address
  pub fn offset<E: Element>(&self, image: &MemoryImage, row: usize, col: usize) -> Result<usize> {
    let overflow = || GemxError::AddressOutOfRange {
      offset: usize::MAX,
      len: E::BYTES,
      image_len: image.len(),
    };
    let base = self.page.checked_mul(image.page_size()).ok_or_else(overflow)?;
    row
      .checked_mul(self.ld)
      .and_then(|index| index.checked_add(col))
      .and_then(|index| index.checked_mul(E::BYTES))
      .and_then(|bytes| bytes.checked_add(base))
      .ok_or_else(overflow)
  }

  pub fn get<E: Element>(&self, image: &MemoryImage, row: usize, col: usize) -> Result<E> {
    image.read(self.offset::<E>(image, row, col)?)
  }

  pub fn set<E: Element>(&self, image: &mut MemoryImage, row: usize, col: usize, value: E) -> Result<()> {
    let offset = self.offset::<E>(image, row, col)?;
    image.write(offset, value)
  }

  /// `width` consecutive elements of one row
  pub fn read_word<E: Element>(&self, image: &MemoryImage, row: usize, col: usize, width: usize) -> Result<Vec<E>> {
    let offset = self.offset::<E>(image, row, col)?;
    let len = width.checked_mul(E::BYTES).ok_or(GemxError::AddressOutOfRange {
      offset,
      len: usize::MAX,
      image_len: image.len(),
    })?;
    let bytes = image.slice(offset, len)?;
    Ok(bytes.chunks_exact(E::BYTES).map(E::read_le).collect())
  }

  pub fn write_word<E: Element>(&self, image: &mut MemoryImage, row: usize, col: usize, word: &[E]) -> Result<()> {
    let offset = self.offset::<E>(image, row, col)?;
    let bytes = image.slice_mut(offset, word.len() * E::BYTES)?;
    for (value, out) in word.iter().zip(bytes.chunks_exact_mut(E::BYTES)) {
      value.write_le(out);
    }
    Ok(())
  }

  /// Rejects views whose last element would fall outside the image
  pub fn check_fits<E: Element>(&self, image: &MemoryImage, what: &str) -> Result<()> {
    if self.rows == 0 || self.cols == 0 {
      return Ok(());
    }
    if self.cols > self.ld {
      return Err(GemxError::dimension(format!(
        "{}: {} columns exceed leading dimension {}",
        what, self.cols, self.ld
      )));
    }
    let end = self.offset::<E>(image, self.rows - 1, self.cols - 1)?.saturating_add(E::BYTES);
    if self.page < super::DATA_PAGE || end > image.len() {
      return Err(GemxError::dimension(format!(
        "{}: {}x{} (ld {}) at page {} does not fit the data segment",
        what, self.rows, self.cols, self.ld, self.page
      )));
    }
    Ok(())
  }

  /// Fill with `(first + i) % modulus` in row-major order over the leading dimension
  pub fn fill_mod<E: Element>(&self, image: &mut MemoryImage, modulus: i64, first: i64) -> Result<()> {
    let mut value = first % modulus.max(1);
    for row in 0..self.rows {
      for col in 0..self.ld {
        self.set(image, row, col, E::from_i64(value))?;
        value = (value + 1) % modulus.max(1);
      }
    }
    Ok(())
  }

  pub fn to_rows<E: Element>(&self, image: &MemoryImage) -> Result<Vec<Vec<E>>> {
    (0..self.rows).map(|row| self.read_word(image, row, 0, self.cols)).collect()
  }
}
