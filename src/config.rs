/// Engine configuration parameters
use crate::error::{GemxError, Result};
use serde::{Deserialize, Serialize};

/// Element codec stored in the data segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
  I32,
  F32,
}

impl ElementKind {
  pub fn bytes(self) -> usize {
    match self {
      ElementKind::I32 | ElementKind::F32 => 4,
    }
  }
}

/// Memory image and instruction stream geometry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageSection {
  #[serde(default = "default_page_size")]
  pub page_size: usize,
  /// elements per bus word, also the systolic array edge
  #[serde(default = "default_ddr_width")]
  pub ddr_width: usize,
  /// bus words per instruction slot
  #[serde(default = "default_instr_width")]
  pub instr_width: usize,
  #[serde(default = "default_max_instructions")]
  pub max_instructions: usize,
  #[serde(default = "default_element")]
  pub element: ElementKind,
}

fn default_page_size() -> usize {
  4096
}

fn default_ddr_width() -> usize {
  16
}

fn default_instr_width() -> usize {
  1
}

fn default_max_instructions() -> usize {
  64
}

fn default_element() -> ElementKind {
  ElementKind::I32
}

impl Default for ImageSection {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
      ddr_width: default_ddr_width(),
      instr_width: default_instr_width(),
      max_instructions: default_max_instructions(),
      element: default_element(),
    }
  }
}

/// Dense engine blocking factors, in bus words
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GemmSection {
  #[serde(default = "default_two")]
  pub row_words: usize,
  #[serde(default = "default_two")]
  pub col_words: usize,
  #[serde(default = "default_one")]
  pub k_words: usize,
}

fn default_one() -> usize {
  1
}

fn default_two() -> usize {
  2
}

impl Default for GemmSection {
  fn default() -> Self {
    Self {
      row_words: default_two(),
      col_words: default_two(),
      k_words: default_one(),
    }
  }
}

/// Sparse engine partitioning and pipeline sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpmvSection {
  #[serde(default = "default_lanes")]
  pub lanes: usize,
  #[serde(default = "default_two")]
  pub mac_groups: usize,
  #[serde(default = "default_c_block_rows")]
  pub c_block_rows: usize,
  #[serde(default = "default_b_block_cols")]
  pub b_block_cols: usize,
  #[serde(default = "default_max_blocks")]
  pub max_blocks: usize,
  /// consecutive nonzeros taken from one row unit before moving on
  #[serde(default = "default_row_break")]
  pub row_break: usize,
  #[serde(default = "default_fifo_depth")]
  pub fifo_depth: usize,
}

fn default_lanes() -> usize {
  4
}

fn default_c_block_rows() -> usize {
  128
}

fn default_b_block_cols() -> usize {
  64
}

fn default_max_blocks() -> usize {
  32
}

fn default_row_break() -> usize {
  16
}

fn default_fifo_depth() -> usize {
  4
}

impl Default for SpmvSection {
  fn default() -> Self {
    Self {
      lanes: default_lanes(),
      mac_groups: default_two(),
      c_block_rows: default_c_block_rows(),
      b_block_cols: default_b_block_cols(),
      max_blocks: default_max_blocks(),
      row_break: default_row_break(),
      fifo_depth: default_fifo_depth(),
    }
  }
}

/// Transpose engine tile geometry, in bus words
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranspSection {
  #[serde(default = "default_two")]
  pub blocks: usize,
  #[serde(default = "default_one")]
  pub m_groups: usize,
}

impl Default for TranspSection {
  fn default() -> Self {
    Self {
      blocks: default_two(),
      m_groups: default_one(),
    }
  }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
  #[serde(default)]
  pub image: ImageSection,
  #[serde(default)]
  pub gemm: GemmSection,
  #[serde(default)]
  pub spmv: SpmvSection,
  #[serde(default)]
  pub transp: TranspSection,
}

impl EngineConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_ddr_width(ddr_width: usize) -> Self {
    let mut config = Self::default();
    config.image.ddr_width = ddr_width;
    config
  }

  pub fn element_bytes(&self) -> usize {
    self.image.element.bytes()
  }

  /// Bytes in one instruction (and one result) slot
  pub fn instr_bytes(&self) -> usize {
    self.image.ddr_width * self.element_bytes() * self.image.instr_width
  }

  pub fn gemm_row_block(&self) -> usize {
    self.image.ddr_width * self.gemm.row_words
  }

  pub fn gemm_col_block(&self) -> usize {
    self.image.ddr_width * self.gemm.col_words
  }

  pub fn gemm_k_block(&self) -> usize {
    self.image.ddr_width * self.gemm.k_words
  }

  pub fn transp_edge(&self) -> usize {
    self.image.ddr_width * self.transp.blocks
  }

  pub fn row_units(&self) -> usize {
    self.spmv.lanes * self.spmv.mac_groups
  }

  /// Pages reserved in front of every sparse matrix for the descriptor table
  pub fn desc_pages(&self) -> usize {
    (self.spmv.max_blocks * crate::sparse::DESC_BYTES).div_ceil(self.image.page_size)
  }

  pub fn validate(&self) -> Result<()> {
    let img = &self.image;
    for (name, value) in [
      ("image.page_size", img.page_size),
      ("image.ddr_width", img.ddr_width),
      ("image.instr_width", img.instr_width),
      ("image.max_instructions", img.max_instructions),
      ("gemm.row_words", self.gemm.row_words),
      ("gemm.col_words", self.gemm.col_words),
      ("gemm.k_words", self.gemm.k_words),
      ("spmv.lanes", self.spmv.lanes),
      ("spmv.mac_groups", self.spmv.mac_groups),
      ("spmv.max_blocks", self.spmv.max_blocks),
      ("spmv.row_break", self.spmv.row_break),
      ("spmv.fifo_depth", self.spmv.fifo_depth),
      ("transp.blocks", self.transp.blocks),
      ("transp.m_groups", self.transp.m_groups),
    ] {
      if value == 0 {
        return Err(GemxError::config(format!("{} must be greater than 0", name)));
      }
    }
    if img.max_instructions < 2 {
      return Err(GemxError::config("image.max_instructions must leave room for the terminal instruction"));
    }
    let widest = crate::isa::Instruction::max_encoded_bytes();
    if self.instr_bytes() < widest {
      return Err(GemxError::config(format!(
        "instruction slots of {} bytes cannot hold the widest instruction ({} bytes)",
        self.instr_bytes(),
        widest
      )));
    }
    if img.max_instructions * self.instr_bytes() > img.page_size {
      return Err(GemxError::config(format!(
        "{} instruction slots of {} bytes do not fit a {} byte code page",
        img.max_instructions,
        self.instr_bytes(),
        img.page_size
      )));
    }
    if img.page_size % (img.ddr_width * self.element_bytes()) != 0 {
      return Err(GemxError::config("image.page_size must hold a whole number of bus words"));
    }
    let units = self.row_units();
    if self.spmv.c_block_rows == 0 || self.spmv.c_block_rows % units != 0 {
      return Err(GemxError::config(format!("spmv.c_block_rows must be a positive multiple of {}", units)));
    }
    if self.spmv.b_block_cols == 0 || self.spmv.b_block_cols % self.spmv.lanes != 0 {
      return Err(GemxError::config(format!(
        "spmv.b_block_cols must be a positive multiple of {}",
        self.spmv.lanes
      )));
    }
    if self.spmv.c_block_rows > u16::MAX as usize + 1 || self.spmv.b_block_cols > u16::MAX as usize + 1 {
      return Err(GemxError::config("sparse block indices must fit 16 bits"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_geometry() {
    let config = EngineConfig::new();
    assert!(config.validate().is_ok());
    assert_eq!(config.instr_bytes(), 64);
    assert_eq!(config.gemm_row_block(), 32);
    assert_eq!(config.gemm_k_block(), 16);
    assert_eq!(config.row_units(), 8);
    assert_eq!(config.desc_pages(), 1);
  }

  #[test]
  fn test_code_page_overflow_rejected() {
    let mut config = EngineConfig::new();
    config.image.max_instructions = 65;
    assert!(matches!(config.validate(), Err(GemxError::Config { .. })));
  }

  #[test]
  fn test_slot_must_hold_widest_instruction() {
    let mut config = EngineConfig::with_ddr_width(2);
    assert!(matches!(config.validate(), Err(GemxError::Config { .. })));
    // 2 elements x 4 bytes x 7 words = 56 bytes
    config.image.instr_width = 7;
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_toml_keeps_defaults() {
    let config: EngineConfig = toml::from_str("[spmv]\nlanes = 2\n").unwrap();
    assert_eq!(config.spmv.lanes, 2);
    assert_eq!(config.spmv.mac_groups, 2);
    assert_eq!(config.image.ddr_width, 16);
  }
}
