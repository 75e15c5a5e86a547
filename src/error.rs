/// Error taxonomy shared by the builder, the codec and the dispatch loop
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GemxError>;

#[derive(Debug, Error)]
pub enum GemxError {
  /// Malformed instruction stream or misplaced terminal marker
  #[error("program format error: {reason}")]
  ProgramFormat { reason: String },

  /// Opcode tag outside the closed instruction set
  #[error("invalid opcode tag {tag}")]
  InvalidOpcode { tag: u32 },

  /// Handle re-requested with a different element count
  #[error("handle '{handle}' holds {existing} elements, requested {requested}")]
  SizeMismatch {
    handle: String,
    existing: usize,
    requested: usize,
  },

  /// Serialized image length is not a whole number of pages
  #[error("corrupt image: {len} bytes is not a positive multiple of page size {page_size}")]
  CorruptImage { len: usize, page_size: usize },

  #[error("capacity exceeded: {what} needs {needed}, limit is {limit}")]
  CapacityExceeded {
    what: &'static str,
    needed: usize,
    limit: usize,
  },

  #[error("dimension constraint violated: {reason}")]
  DimensionConstraint { reason: String },

  #[error("sparse matrix declares zero nonzeros")]
  EmptyMatrix,

  #[error("address range {offset:#x}+{len} outside image of {image_len} bytes")]
  AddressOutOfRange {
    offset: usize,
    len: usize,
    image_len: usize,
  },

  #[error("pipeline stage '{stage}' stalled after {cycles} cycles")]
  Stalled { stage: String, cycles: u64 },

  #[error("configuration error: {reason}")]
  Config { reason: String },

  #[error("I/O error: {source}")]
  Io {
    #[from]
    source: std::io::Error,
  },
}

impl GemxError {
  pub fn format(reason: impl Into<String>) -> Self {
    Self::ProgramFormat { reason: reason.into() }
  }

  pub fn dimension(reason: impl Into<String>) -> Self {
    Self::DimensionConstraint { reason: reason.into() }
  }

  pub fn config(reason: impl Into<String>) -> Self {
    Self::Config { reason: reason.into() }
  }
}

impl From<GemxError> for std::io::Error {
  fn from(err: GemxError) -> Self {
    match err {
      GemxError::Io { source } => source,
      other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
  }
}
