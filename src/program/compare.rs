/// Element-wise image comparison with relative and absolute tolerances
use crate::error::{GemxError, Result};
use crate::memory::{MemoryImage, DATA_PAGE};
use crate::numeric::Element;
use std::fmt;

/// Mismatches kept verbatim in a report
const MAX_SAMPLES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Exact,
  WithinTolerance,
  Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
  pub rtol: f64,
  pub atol: f64,
}

impl Default for Tolerance {
  fn default() -> Self {
    Self { rtol: 1e-3, atol: 1e-5 }
  }
}

/// Bit-identical values are exact; otherwise `|d| / |ref| <= rtol` or `|d| <= atol` passes
pub fn classify<E: Element>(got: E, want: E, tol: Tolerance) -> Verdict {
  let (mut a, mut b) = ([0u8; 8], [0u8; 8]);
  got.write_le(&mut a);
  want.write_le(&mut b);
  if a == b {
    return Verdict::Exact;
  }
  let (g, w) = (got.to_f64(), want.to_f64());
  let diff = (g - w).abs();
  if diff <= tol.atol || (w != 0.0 && diff / w.abs() <= tol.rtol) {
    Verdict::WithinTolerance
  } else {
    Verdict::Mismatch
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementMismatch {
  /// byte offset in the image
  pub offset: usize,
  pub got: f64,
  pub want: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompareReport {
  pub total: usize,
  pub exact: usize,
  pub within: usize,
  pub mismatched: usize,
  pub samples: Vec<ElementMismatch>,
}

impl CompareReport {
  pub fn passed(&self) -> bool {
    self.mismatched == 0
  }

  fn record<E: Element>(&mut self, offset: usize, got: E, want: E, tol: Tolerance) {
    self.total += 1;
    match classify(got, want, tol) {
      Verdict::Exact => self.exact += 1,
      Verdict::WithinTolerance => self.within += 1,
      Verdict::Mismatch => {
        self.mismatched += 1;
        if self.samples.len() < MAX_SAMPLES {
          self.samples.push(ElementMismatch {
            offset,
            got: got.to_f64(),
            want: want.to_f64(),
          });
        }
      },
    }
  }
}

impl fmt::Display for CompareReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "compared {} values: exact {}, within tolerance {}, mismatch {}",
      self.total, self.exact, self.within, self.mismatched
    )?;
    for s in &self.samples {
      writeln!(f, "  {:#010x}: got {} want {}", s.offset, s.got, s.want)?;
    }
    write!(f, "{}", if self.passed() { "PASS" } else { "FAIL" })
  }
}

/// Compare the data segments of two images element by element
pub fn compare_images<E: Element>(got: &MemoryImage, want: &MemoryImage, tol: Tolerance) -> Result<CompareReport> {
  if got.page_size() != want.page_size() || got.len() != want.len() {
    return Err(GemxError::CorruptImage {
      len: got.len(),
      page_size: want.page_size(),
    });
  }
  let mut report = CompareReport::default();
  let start = got.region_address(DATA_PAGE).min(got.len());
  let mut offset = start;
  while offset + E::BYTES <= got.len() {
    report.record(offset, got.read::<E>(offset)?, want.read::<E>(offset)?, tol);
    offset += E::BYTES;
  }
  log::info!(
    "compare: {} exact, {} within tolerance, {} mismatched",
    report.exact,
    report.within,
    report.mismatched
  );
  Ok(report)
}
