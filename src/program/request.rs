/// Operation requests as read from a TOML program file
use crate::error::{GemxError, Result};
use crate::isa::MatrixFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_scale() -> i32 {
  1
}

/// Destination layouts a transpose request may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransposeTarget {
  Cm,
  Gva,
}

impl TransposeTarget {
  pub fn format(self) -> MatrixFormat {
    match self {
      TransposeTarget::Cm => MatrixFormat::Cm,
      TransposeTarget::Gva => MatrixFormat::GvA,
    }
  }
}

/// Dense product operands shared by gemm and fcn requests. Leading dimensions default to the
/// matrix width.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GemmRequest {
  pub a: String,
  pub b: String,
  pub c: String,
  #[serde(default)]
  pub x: Option<String>,
  pub m: usize,
  pub k: usize,
  pub n: usize,
  #[serde(default)]
  pub lda: Option<usize>,
  #[serde(default)]
  pub ldb: Option<usize>,
  #[serde(default)]
  pub ldc: Option<usize>,
  #[serde(default)]
  pub ldx: Option<usize>,
  #[serde(default = "default_scale")]
  pub scale: i32,
  #[serde(default)]
  pub shift: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OpRequest {
  Gemm(GemmRequest),
  Fcn {
    #[serde(flatten)]
    gemm: GemmRequest,
    /// negative-branch multiplier; 0 is a plain rectifier
    #[serde(default)]
    alpha: i16,
    #[serde(default)]
    alpha_shift: u32,
  },
  Gemv {
    a: String,
    b: String,
    c: String,
    m: usize,
    k: usize,
    #[serde(default)]
    lda: Option<usize>,
  },
  Transpose {
    src: String,
    dst: String,
    rows: usize,
    cols: usize,
    format: TransposeTarget,
  },
  Spmv {
    a: String,
    b: String,
    c: String,
    m: usize,
    k: usize,
    nnz: usize,
    #[serde(default)]
    activation: Option<(i16, u32)>,
  },
}

impl OpRequest {
  pub fn kind(&self) -> &'static str {
    match self {
      OpRequest::Gemm(_) => "gemm",
      OpRequest::Fcn { .. } => "fcn",
      OpRequest::Gemv { .. } => "gemv",
      OpRequest::Transpose { .. } => "transpose",
      OpRequest::Spmv { .. } => "spmv",
    }
  }
}

/// `[[op]]` tables in program order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProgramFile {
  #[serde(default, rename = "op")]
  pub ops: Vec<OpRequest>,
}

impl ProgramFile {
  pub fn parse(text: &str) -> Result<Self> {
    toml::from_str(text).map_err(|e| GemxError::config(format!("invalid program file: {}", e)))
  }

  pub fn load(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path)?;
    let program = Self::parse(&text)?;
    log::info!("program {}: {} ops", path.display(), program.ops.len());
    Ok(program)
  }
}
