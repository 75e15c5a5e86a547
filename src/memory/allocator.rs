/// Deterministic bump allocator binding handle names to page ranges
use super::image::MemoryImage;
use crate::error::{GemxError, Result};
use std::collections::BTreeMap;

/// Page range owned by a handle; immutable once allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub start_page: usize,
  pub num_pages: usize,
  pub elements: usize,
}

#[derive(Debug, Clone)]
pub struct PageAllocator {
  element_bytes: usize,
  handles: BTreeMap<String, Region>,
}

/// Outcome of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
  pub start_page: usize,
  /// true on the first request for the handle
  pub fresh: bool,
}

impl PageAllocator {
  pub fn new(element_bytes: usize) -> Self {
    Self {
      element_bytes,
      handles: BTreeMap::new(),
    }
  }

  /// First request grows the image; repeats must ask for the same element count
  pub fn allocate(&mut self, image: &mut MemoryImage, handle: &str, elements: usize) -> Result<Allocation> {
    if elements == 0 {
      return Err(GemxError::dimension(format!("handle '{}' requested zero elements", handle)));
    }
    if let Some(region) = self.handles.get(handle) {
      if region.elements != elements {
        return Err(GemxError::SizeMismatch {
          handle: handle.to_string(),
          existing: region.elements,
          requested: elements,
        });
      }
      return Ok(Allocation {
        start_page: region.start_page,
        fresh: false,
      });
    }

    let bytes = elements.checked_mul(self.element_bytes).ok_or_else(|| {
      GemxError::dimension(format!("handle '{}' of {} elements overflows the address space", handle, elements))
    })?;
    let num_pages = bytes.div_ceil(image.page_size());
    let start_page = image.grow(num_pages);
    log::debug!("allocated '{}' at page {} ({} pages)", handle, start_page, num_pages);
    self.handles.insert(
      handle.to_string(),
      Region {
        start_page,
        num_pages,
        elements,
      },
    );
    Ok(Allocation { start_page, fresh: true })
  }

  pub fn region(&self, handle: &str) -> Option<Region> {
    self.handles.get(handle).copied()
  }
}
