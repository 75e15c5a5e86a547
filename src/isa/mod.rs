/// Instruction set: opcodes, operand payloads and the slot codec
pub mod cursor;

use crate::error::{GemxError, Result};
use crate::numeric::{Activation, PostScale};
use cursor::{BitReader, BitWriter};

const SCRATCH_SLOT_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
  Control,
  Gemv,
  Gemm,
  Transpose,
  Spmv,
  Result,
  Fcn,
}

impl Opcode {
  pub fn tag(self) -> u32 {
    match self {
      Opcode::Control => 0,
      Opcode::Gemv => 1,
      Opcode::Gemm => 2,
      Opcode::Transpose => 3,
      Opcode::Spmv => 4,
      Opcode::Result => 5,
      Opcode::Fcn => 7,
    }
  }

  pub fn from_tag(tag: u32) -> Result<Self> {
    match tag {
      0 => Ok(Opcode::Control),
      1 => Ok(Opcode::Gemv),
      2 => Ok(Opcode::Gemm),
      3 => Ok(Opcode::Transpose),
      4 => Ok(Opcode::Spmv),
      5 => Ok(Opcode::Result),
      7 => Ok(Opcode::Fcn),
      _ => Err(GemxError::InvalidOpcode { tag }),
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Opcode::Control => "control",
      Opcode::Gemv => "gemv",
      Opcode::Gemm => "gemm",
      Opcode::Transpose => "transpose",
      Opcode::Spmv => "spmv",
      Opcode::Result => "result",
      Opcode::Fcn => "fcn",
    }
  }
}

/// Operand payload that knows its own field order
trait Fields: Sized {
  fn write(&self, w: &mut BitWriter) -> Result<()>;
  fn read(r: &mut BitReader) -> Result<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlArgs {
  pub is_last: bool,
  pub noop: bool,
}

impl ControlArgs {
  pub const NOOP: ControlArgs = ControlArgs { is_last: false, noop: true };
  pub const LAST: ControlArgs = ControlArgs { is_last: true, noop: false };
}

impl Fields for ControlArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    w.put_bool(self.is_last)?;
    w.put_bool(self.noop)
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    let args = Self {
      is_last: r.take_bool()?,
      noop: r.take_bool()?,
    };
    if !args.is_last && !args.noop {
      return Err(GemxError::format("control instruction is neither a no-op nor the last"));
    }
    Ok(args)
  }
}

/// Offsets are page indices into the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GemvArgs {
  pub a: u32,
  pub b: u32,
  pub c: u32,
  pub m: u32,
  pub k: u32,
  pub lda: u32,
}

impl Fields for GemvArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    for v in [self.a, self.b, self.c, self.m, self.k, self.lda] {
      w.put_u32(v)?;
    }
    Ok(())
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    Ok(Self {
      a: r.take_u32()?,
      b: r.take_u32()?,
      c: r.take_u32()?,
      m: r.take_u32()?,
      k: r.take_u32()?,
      lda: r.take_u32()?,
    })
  }
}

/// `x == 0` means no bias term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GemmArgs {
  pub a: u32,
  pub b: u32,
  pub c: u32,
  pub x: u32,
  pub m: u32,
  pub k: u32,
  pub n: u32,
  pub lda: u32,
  pub ldb: u32,
  pub ldc: u32,
  pub ldx: u32,
  pub post_scale: i32,
}

impl GemmArgs {
  pub fn post(&self) -> PostScale {
    PostScale::from_word(self.post_scale)
  }
}

impl Fields for GemmArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    for v in [
      self.a, self.b, self.c, self.x, self.m, self.k, self.n, self.lda, self.ldb, self.ldc, self.ldx,
    ] {
      w.put_u32(v)?;
    }
    w.put_i32(self.post_scale)
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    Ok(Self {
      a: r.take_u32()?,
      b: r.take_u32()?,
      c: r.take_u32()?,
      x: r.take_u32()?,
      m: r.take_u32()?,
      k: r.take_u32()?,
      n: r.take_u32()?,
      lda: r.take_u32()?,
      ldb: r.take_u32()?,
      ldc: r.take_u32()?,
      ldx: r.take_u32()?,
      post_scale: r.take_i32()?,
    })
  }
}

/// Gemm with a fused leaky activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FcnArgs {
  pub gemm: GemmArgs,
  pub activation: i16,
}

impl FcnArgs {
  pub fn act(&self) -> Activation {
    Activation::from_word(self.activation)
  }
}

impl Fields for FcnArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    self.gemm.write(w)?;
    w.put_i16(self.activation)
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    Ok(Self {
      gemm: GemmArgs::read(r)?,
      activation: r.take_i16()?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixFormat {
  #[default]
  Unknown,
  Rm,
  Cm,
  GvA,
  GmA,
  GmB,
}

impl MatrixFormat {
  fn tag(self) -> u32 {
    match self {
      MatrixFormat::Unknown => 0,
      MatrixFormat::Rm => 1,
      MatrixFormat::Cm => 2,
      MatrixFormat::GvA => 3,
      MatrixFormat::GmA => 4,
      MatrixFormat::GmB => 5,
    }
  }

  fn from_tag(tag: u32) -> Result<Self> {
    Ok(match tag {
      0 => MatrixFormat::Unknown,
      1 => MatrixFormat::Rm,
      2 => MatrixFormat::Cm,
      3 => MatrixFormat::GvA,
      4 => MatrixFormat::GmA,
      5 => MatrixFormat::GmB,
      other => return Err(GemxError::format(format!("unknown matrix format {}", other))),
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatrixShape {
  pub offset: u32,
  pub rows: u32,
  pub cols: u32,
  pub ld: u32,
  pub gf_edge: u32,
  pub format: MatrixFormat,
}

impl Fields for MatrixShape {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    for v in [self.offset, self.rows, self.cols, self.ld, self.gf_edge, self.format.tag()] {
      w.put_u32(v)?;
    }
    Ok(())
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    Ok(Self {
      offset: r.take_u32()?,
      rows: r.take_u32()?,
      cols: r.take_u32()?,
      ld: r.take_u32()?,
      gf_edge: r.take_u32()?,
      format: MatrixFormat::from_tag(r.take_u32()?)?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranspArgs {
  pub src: MatrixShape,
  pub dst: MatrixShape,
}

impl Fields for TranspArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    self.src.write(w)?;
    self.dst.write(w)
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    Ok(Self {
      src: MatrixShape::read(r)?,
      dst: MatrixShape::read(r)?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpmvArgs {
  pub a: u32,
  pub b: u32,
  pub c: u32,
  pub m: u32,
  pub k: u32,
  pub nnz: u32,
  pub b_blocks: u32,
  pub c_blocks: u32,
  pub desc_pages: u32,
  pub use_activation: bool,
  pub activation: i16,
}

impl SpmvArgs {
  pub fn act(&self) -> Option<Activation> {
    self.use_activation.then(|| Activation::from_word(self.activation))
  }
}

impl Fields for SpmvArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    for v in [
      self.a,
      self.b,
      self.c,
      self.m,
      self.k,
      self.nnz,
      self.b_blocks,
      self.c_blocks,
      self.desc_pages,
    ] {
      w.put_u32(v)?;
    }
    w.put_bool(self.use_activation)?;
    w.put_i16(self.activation)
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    Ok(Self {
      a: r.take_u32()?,
      b: r.take_u32()?,
      c: r.take_u32()?,
      m: r.take_u32()?,
      k: r.take_u32()?,
      nnz: r.take_u32()?,
      b_blocks: r.take_u32()?,
      c_blocks: r.take_u32()?,
      desc_pages: r.take_u32()?,
      use_activation: r.take_bool()?,
      activation: r.take_i16()?,
    })
  }
}

/// Start and end tick of one executed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultArgs {
  pub start: u64,
  pub end: u64,
}

impl Fields for ResultArgs {
  fn write(&self, w: &mut BitWriter) -> Result<()> {
    w.put_u64(self.start)?;
    w.put_u64(self.end)
  }

  fn read(r: &mut BitReader) -> Result<Self> {
    let args = Self {
      start: r.take_u64()?,
      end: r.take_u64()?,
    };
    if args.start > args.end {
      return Err(GemxError::format(format!(
        "result record ends at {} before it starts at {}",
        args.end, args.start
      )));
    }
    Ok(args)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
  Control(ControlArgs),
  Gemv(GemvArgs),
  Gemm(GemmArgs),
  Transpose(TranspArgs),
  Spmv(SpmvArgs),
  Result(ResultArgs),
  Fcn(FcnArgs),
}

impl Instruction {
  pub fn opcode(&self) -> Opcode {
    match self {
      Instruction::Control(_) => Opcode::Control,
      Instruction::Gemv(_) => Opcode::Gemv,
      Instruction::Gemm(_) => Opcode::Gemm,
      Instruction::Transpose(_) => Opcode::Transpose,
      Instruction::Spmv(_) => Opcode::Spmv,
      Instruction::Result(_) => Opcode::Result,
      Instruction::Fcn(_) => Opcode::Fcn,
    }
  }

  fn write(&self, w: &mut BitWriter) -> Result<()> {
    w.put_u32(self.opcode().tag())?;
    match self {
      Instruction::Control(args) => args.write(w),
      Instruction::Gemv(args) => args.write(w),
      Instruction::Gemm(args) => args.write(w),
      Instruction::Transpose(args) => args.write(w),
      Instruction::Spmv(args) => args.write(w),
      Instruction::Result(args) => args.write(w),
      Instruction::Fcn(args) => args.write(w),
    }
  }

  pub fn encode(&self, slot_bytes: usize) -> Result<Vec<u8>> {
    let mut w = BitWriter::new(slot_bytes);
    self.write(&mut w)?;
    Ok(w.finish())
  }

  /// Bytes taken by the tag and payload, independent of the field values
  pub fn encoded_bytes(&self) -> usize {
    let mut w = BitWriter::new(SCRATCH_SLOT_BYTES);
    // the scratch slot is larger than any payload
    let _ = self.write(&mut w);
    w.bit_pos().div_ceil(8)
  }

  /// Smallest slot that holds every opcode
  pub fn max_encoded_bytes() -> usize {
    [
      Instruction::Control(ControlArgs::LAST),
      Instruction::Gemv(GemvArgs::default()),
      Instruction::Gemm(GemmArgs::default()),
      Instruction::Transpose(TranspArgs::default()),
      Instruction::Spmv(SpmvArgs::default()),
      Instruction::Result(ResultArgs::default()),
      Instruction::Fcn(FcnArgs::default()),
    ]
    .iter()
    .map(Instruction::encoded_bytes)
    .max()
    .unwrap_or(0)
  }

  /// Fields are read back in exactly the order `encode` wrote them
  pub fn decode(slot: &[u8]) -> Result<Self> {
    let mut r = BitReader::new(slot);
    let opcode = Opcode::from_tag(r.take_u32()?)?;
    Ok(match opcode {
      Opcode::Control => Instruction::Control(ControlArgs::read(&mut r)?),
      Opcode::Gemv => Instruction::Gemv(GemvArgs::read(&mut r)?),
      Opcode::Gemm => Instruction::Gemm(GemmArgs::read(&mut r)?),
      Opcode::Transpose => Instruction::Transpose(TranspArgs::read(&mut r)?),
      Opcode::Spmv => Instruction::Spmv(SpmvArgs::read(&mut r)?),
      Opcode::Result => Instruction::Result(ResultArgs::read(&mut r)?),
      Opcode::Fcn => Instruction::Fcn(FcnArgs::read(&mut r)?),
    })
  }
}

/// Read only the tag of a slot
pub fn peek_opcode(slot: &[u8]) -> Result<Opcode> {
  Opcode::from_tag(BitReader::new(slot).take_u32()?)
}

#[cfg(test)]
mod tests {
  use super::*;

  const SLOT: usize = 64;

  fn sample_gemm() -> GemmArgs {
    GemmArgs {
      a: 2,
      b: 3,
      c: 4,
      x: 5,
      m: 32,
      k: 48,
      n: 64,
      lda: 48,
      ldb: 64,
      ldc: 64,
      ldx: 64,
      post_scale: PostScale::new(3, 4).to_word(),
    }
  }

  #[test]
  fn test_opcode_tags() {
    for op in [
      Opcode::Control,
      Opcode::Gemv,
      Opcode::Gemm,
      Opcode::Transpose,
      Opcode::Spmv,
      Opcode::Result,
      Opcode::Fcn,
    ] {
      assert_eq!(Opcode::from_tag(op.tag()).unwrap(), op);
    }
    assert!(matches!(Opcode::from_tag(6), Err(GemxError::InvalidOpcode { tag: 6 })));
  }

  #[test]
  fn test_gemm_layout_is_positional() {
    let word = Instruction::Gemm(sample_gemm()).encode(SLOT).unwrap();
    assert_eq!(word.len(), SLOT);
    assert_eq!(&word[0..4], &2u32.to_le_bytes());
    assert_eq!(&word[4..8], &2u32.to_le_bytes());
    assert_eq!(&word[20..24], &32u32.to_le_bytes());
    assert_eq!(&word[48..52], &PostScale::new(3, 4).to_word().to_le_bytes());
    assert_eq!(peek_opcode(&word).unwrap(), Opcode::Gemm);
  }

  #[test]
  fn test_round_trip_every_type() {
    let instrs = [
      Instruction::Control(ControlArgs::NOOP),
      Instruction::Control(ControlArgs::LAST),
      Instruction::Gemv(GemvArgs { a: 2, b: 9, c: 10, m: 64, k: 32, lda: 32 }),
      Instruction::Gemm(sample_gemm()),
      Instruction::Fcn(FcnArgs {
        gemm: sample_gemm(),
        activation: Activation::new(-3, 2).to_word(),
      }),
      Instruction::Transpose(TranspArgs {
        src: MatrixShape { offset: 2, rows: 64, cols: 32, ld: 32, gf_edge: 0, format: MatrixFormat::Rm },
        dst: MatrixShape { offset: 4, rows: 32, cols: 64, ld: 64, gf_edge: 0, format: MatrixFormat::Cm },
      }),
      Instruction::Spmv(SpmvArgs {
        a: 2,
        b: 7,
        c: 8,
        m: 96,
        k: 128,
        nnz: 256,
        b_blocks: 2,
        c_blocks: 1,
        desc_pages: 1,
        use_activation: true,
        activation: 0,
      }),
      Instruction::Result(ResultArgs { start: 10, end: u64::MAX }),
    ];
    for instr in instrs {
      let word = instr.encode(SLOT).unwrap();
      let back = Instruction::decode(&word).unwrap();
      assert_eq!(back, instr);
      assert_eq!(back.encode(SLOT).unwrap(), word);
    }
  }

  #[test]
  fn test_decode_rejects_malformed() {
    // all-zero slot is a control word with neither flag
    assert!(matches!(Instruction::decode(&[0u8; SLOT]), Err(GemxError::ProgramFormat { .. })));
    let mut word = vec![0u8; SLOT];
    word[0] = 9;
    assert!(matches!(Instruction::decode(&word), Err(GemxError::InvalidOpcode { tag: 9 })));
    let result = Instruction::Result(ResultArgs { start: 5, end: 1 }).encode(SLOT).unwrap();
    assert!(Instruction::decode(&result).is_err());
  }

  #[test]
  fn test_slot_too_small() {
    assert!(Instruction::Gemm(sample_gemm()).encode(32).is_err());
  }

  #[test]
  fn test_encoded_sizes() {
    assert_eq!(Instruction::Gemm(sample_gemm()).encoded_bytes(), 52);
    assert_eq!(Instruction::Transpose(TranspArgs::default()).encoded_bytes(), 52);
    assert_eq!(Instruction::Control(ControlArgs::NOOP).encoded_bytes(), 6);
    assert_eq!(Instruction::max_encoded_bytes(), 54);
    let fcn = Instruction::Fcn(FcnArgs::default());
    assert!(fcn.encode(54).is_ok());
    assert!(fcn.encode(53).is_err());
  }
}
