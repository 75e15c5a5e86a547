/// Flat paged memory image shared by every engine
use crate::error::{GemxError, Result};
use crate::numeric::Element;
use std::fs;
use std::path::Path;

pub const CODE_PAGE: usize = 0;
pub const RESULT_PAGE: usize = 1;
pub const DATA_PAGE: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryImage {
  page_size: usize,
  bytes: Vec<u8>,
}

impl MemoryImage {
  /// An image holding only the code and result segments
  pub fn new(page_size: usize) -> Self {
    Self::with_pages(page_size, DATA_PAGE)
  }

  pub fn with_pages(page_size: usize, num_pages: usize) -> Self {
    Self {
      page_size,
      bytes: vec![0; page_size * num_pages],
    }
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn num_pages(&self) -> usize {
    self.bytes.len() / self.page_size
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  /// Raw byte offset of a page
  pub fn region_address(&self, page: usize) -> usize {
    page * self.page_size
  }

  /// Append zeroed pages, returning the first new page index
  pub(crate) fn grow(&mut self, pages: usize) -> usize {
    let start = self.num_pages();
    self.bytes.resize(self.bytes.len() + pages * self.page_size, 0);
    start
  }

  fn check(&self, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
      Some(end) if end <= self.bytes.len() => Ok(()),
      _ => Err(GemxError::AddressOutOfRange {
        offset,
        len,
        image_len: self.bytes.len(),
      }),
    }
  }

  pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
    self.check(offset, len)?;
    Ok(&self.bytes[offset..offset + len])
  }

  pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
    self.check(offset, len)?;
    Ok(&mut self.bytes[offset..offset + len])
  }

  pub fn read<E: Element>(&self, offset: usize) -> Result<E> {
    Ok(E::read_le(self.slice(offset, E::BYTES)?))
  }

  pub fn write<E: Element>(&mut self, offset: usize, value: E) -> Result<()> {
    value.write_le(self.slice_mut(offset, E::BYTES)?);
    Ok(())
  }

  pub fn read_u16(&self, offset: usize) -> Result<u16> {
    let raw = self.slice(offset, 2)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
  }

  pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<()> {
    self.slice_mut(offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
  }

  pub fn read_u32(&self, offset: usize) -> Result<u32> {
    let raw = self.slice(offset, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
  }

  pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
    self.slice_mut(offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.bytes
  }

  pub fn from_bytes(bytes: Vec<u8>, page_size: usize) -> Result<Self> {
    if page_size == 0 || bytes.is_empty() || bytes.len() % page_size != 0 {
      return Err(GemxError::CorruptImage {
        len: bytes.len(),
        page_size,
      });
    }
    Ok(Self { page_size, bytes })
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    fs::write(path, &self.bytes)?;
    log::info!("wrote {} bytes to {}", self.bytes.len(), path.display());
    Ok(())
  }

  pub fn load(path: &Path, page_size: usize) -> Result<Self> {
    let bytes = fs::read(path)?;
    log::info!("loaded {} bytes from {}", bytes.len(), path.display());
    Self::from_bytes(bytes, page_size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserved_segments() {
    let image = MemoryImage::new(256);
    assert_eq!(image.num_pages(), DATA_PAGE);
    assert_eq!(image.region_address(RESULT_PAGE), 256);
  }

  #[test]
  fn test_element_access_bounds() {
    let mut image = MemoryImage::new(64);
    image.write::<i32>(124, -9).unwrap();
    assert_eq!(image.read::<i32>(124).unwrap(), -9);
    assert!(matches!(
      image.read::<i32>(126),
      Err(GemxError::AddressOutOfRange { .. })
    ));
  }

  #[test]
  fn test_from_bytes_rejects_partial_page() {
    assert!(matches!(
      MemoryImage::from_bytes(vec![0; 100], 64),
      Err(GemxError::CorruptImage { len: 100, page_size: 64 })
    ));
    assert!(matches!(MemoryImage::from_bytes(Vec::new(), 64), Err(GemxError::CorruptImage { .. })));
    let image = MemoryImage::from_bytes(vec![1; 128], 64).unwrap();
    assert_eq!(image.num_pages(), 2);
    assert_eq!(image.clone().into_bytes().len(), 128);
  }
}
