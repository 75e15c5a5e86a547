/// Program builder: allocates handles, fills operands and places instructions
use super::fill::cycling_triplets;
use super::request::{GemmRequest, OpRequest};
use crate::config::EngineConfig;
use crate::error::{GemxError, Result};
use crate::isa::{ControlArgs, FcnArgs, GemmArgs, GemvArgs, Instruction, MatrixFormat, MatrixShape, SpmvArgs, TranspArgs};
use crate::memory::{MatrixDesc, MemoryImage, PageAllocator, CODE_PAGE};
use crate::numeric::{Activation, Element, PostScale};
use crate::sparse::{SparseMatrix, Triplet};
use std::marker::PhantomData;

/// Dense product dimensions with leading dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmShape {
  pub m: usize,
  pub k: usize,
  pub n: usize,
  pub lda: usize,
  pub ldb: usize,
  pub ldc: usize,
  pub ldx: usize,
}

impl GemmShape {
  /// Tightly packed operands
  pub fn new(m: usize, k: usize, n: usize) -> Self {
    Self {
      m,
      k,
      n,
      lda: k,
      ldb: n,
      ldc: n,
      ldx: n,
    }
  }

  fn from_request(req: &GemmRequest) -> Self {
    let base = Self::new(req.m, req.k, req.n);
    Self {
      lda: req.lda.unwrap_or(base.lda),
      ldb: req.ldb.unwrap_or(base.ldb),
      ldc: req.ldc.unwrap_or(base.ldc),
      ldx: req.ldx.unwrap_or(base.ldx),
      ..base
    }
  }
}

/// A finished memory image and the instructions placed in it
#[derive(Debug, Clone)]
pub struct BuiltProgram {
  pub image: MemoryImage,
  pub instructions: Vec<Instruction>,
  pub allocator: PageAllocator,
}

pub struct Program<E: Element> {
  config: EngineConfig,
  image: MemoryImage,
  allocator: PageAllocator,
  instructions: Vec<Instruction>,
  _element: PhantomData<E>,
}

/// Instruction operand fields are 32 bits wide
fn check_field(what: &str, value: usize) -> Result<()> {
  if u32::try_from(value).is_err() {
    return Err(GemxError::dimension(format!("{} = {} does not fit a 32-bit operand field", what, value)));
  }
  Ok(())
}

impl<E: Element> Program<E> {
  pub fn new(config: &EngineConfig) -> Result<Self> {
    config.validate()?;
    if config.image.element != E::KIND {
      return Err(GemxError::config(format!(
        "program element {:?} does not match configured {:?}",
        E::KIND,
        config.image.element
      )));
    }
    Ok(Self {
      config: config.clone(),
      image: MemoryImage::new(config.image.page_size),
      allocator: PageAllocator::new(E::BYTES),
      instructions: Vec::new(),
      _element: PhantomData,
    })
  }

  pub fn image(&self) -> &MemoryImage {
    &self.image
  }

  pub fn instructions(&self) -> &[Instruction] {
    &self.instructions
  }

  pub fn allocator(&self) -> &PageAllocator {
    &self.allocator
  }

  /// Real instructions that still fit ahead of the terminal slot
  pub fn remaining(&self) -> usize {
    self.config.image.max_instructions - 1 - self.instructions.len()
  }

  fn width(&self) -> usize {
    self.config.image.ddr_width
  }

  fn check_room(&self) -> Result<()> {
    if self.remaining() == 0 {
      return Err(GemxError::CapacityExceeded {
        what: "instructions",
        needed: self.instructions.len() + 2,
        limit: self.config.image.max_instructions,
      });
    }
    Ok(())
  }

  fn check_aligned(&self, what: &str, value: usize) -> Result<()> {
    let w = self.width();
    if value == 0 || value % w != 0 {
      return Err(GemxError::dimension(format!("{} = {} is not a positive multiple of {}", what, value, w)));
    }
    check_field(what, value)
  }

  fn check_ld(&self, what: &str, ld: usize, cols: usize) -> Result<()> {
    self.check_aligned(what, ld)?;
    if ld < cols {
      return Err(GemxError::dimension(format!("{} = {} is below the row width {}", what, ld, cols)));
    }
    Ok(())
  }

  /// Allocate and, on first use, fill with `(first + i) % modulus`
  fn operand(&mut self, handle: &str, desc_rows: usize, ld: usize, fill: Option<(i64, i64)>) -> Result<usize> {
    let elements = desc_rows
      .checked_mul(ld)
      .ok_or_else(|| GemxError::dimension(format!("'{}' of {}x{} elements overflows the address space", handle, desc_rows, ld)))?;
    let alloc = self.allocator.allocate(&mut self.image, handle, elements)?;
    if let (true, Some((modulus, first))) = (alloc.fresh, fill) {
      MatrixDesc::new(alloc.start_page, desc_rows, ld, ld).fill_mod::<E>(&mut self.image, modulus, first)?;
    }
    Ok(alloc.start_page)
  }

  fn place(&mut self, instr: Instruction) -> Result<()> {
    self.check_room()?;
    let slot = self.config.instr_bytes();
    let word = instr.encode(slot)?;
    let offset = self.image.region_address(CODE_PAGE) + self.instructions.len() * slot;
    self.image.slice_mut(offset, slot)?.copy_from_slice(&word);
    log::debug!("slot {}: {}", self.instructions.len(), instr.opcode().name());
    self.instructions.push(instr);
    Ok(())
  }

  fn gemm_args(&mut self, a: &str, b: &str, c: &str, x: Option<&str>, shape: GemmShape, post: PostScale) -> Result<GemmArgs> {
    self.check_room()?;
    post.validate()?;
    let GemmShape { m, k, n, lda, ldb, ldc, ldx } = shape;
    self.check_aligned("M", m)?;
    self.check_aligned("K", k)?;
    self.check_aligned("N", n)?;
    self.check_ld("lda", lda, k)?;
    self.check_ld("ldb", ldb, n)?;
    self.check_ld("ldc", ldc, n)?;
    if x.is_some() {
      self.check_ld("ldx", ldx, n)?;
    }
    let a_page = self.operand(a, m, lda, Some((67, 1)))?;
    let b_page = self.operand(b, k, ldb, Some((129, 65)))?;
    let c_page = self.operand(c, m, ldc, None)?;
    let x_page = match x {
      Some(handle) => self.operand(handle, m, ldx, None)?,
      None => 0,
    };
    Ok(GemmArgs {
      a: a_page as u32,
      b: b_page as u32,
      c: c_page as u32,
      x: x_page as u32,
      m: m as u32,
      k: k as u32,
      n: n as u32,
      lda: lda as u32,
      ldb: ldb as u32,
      ldc: ldc as u32,
      ldx: if x.is_some() { ldx as u32 } else { 0 },
      post_scale: post.to_word(),
    })
  }

  /// C = A x B (+ X), rescaled
  pub fn add_gemm(&mut self, a: &str, b: &str, c: &str, x: Option<&str>, shape: GemmShape, post: PostScale) -> Result<GemmArgs> {
    let args = self.gemm_args(a, b, c, x, shape, post)?;
    self.place(Instruction::Gemm(args))?;
    Ok(args)
  }

  /// Gemm followed by the leaky activation
  pub fn add_fcn(
    &mut self,
    a: &str,
    b: &str,
    c: &str,
    x: Option<&str>,
    shape: GemmShape,
    post: PostScale,
    act: Activation,
  ) -> Result<FcnArgs> {
    act.validate()?;
    let gemm = self.gemm_args(a, b, c, x, shape, post)?;
    let args = FcnArgs {
      gemm,
      activation: act.to_word(),
    };
    self.place(Instruction::Fcn(args))?;
    Ok(args)
  }

  /// c = A x b
  pub fn add_gemv(&mut self, a: &str, b: &str, c: &str, m: usize, k: usize, lda: usize) -> Result<GemvArgs> {
    self.check_room()?;
    self.check_aligned("M", m)?;
    self.check_aligned("K", k)?;
    self.check_ld("lda", lda, k)?;
    let a_page = self.operand(a, m, lda, Some((67, 1)))?;
    let b_page = self.operand(b, k, 1, Some((7, 0)))?;
    let c_page = self.operand(c, m, 1, None)?;
    let args = GemvArgs {
      a: a_page as u32,
      b: b_page as u32,
      c: c_page as u32,
      m: m as u32,
      k: k as u32,
      lda: lda as u32,
    };
    self.place(Instruction::Gemv(args))?;
    Ok(args)
  }

  /// Reformat a packed row-major `rows x cols` source into `format`
  pub fn add_transpose(&mut self, src: &str, dst: &str, rows: usize, cols: usize, format: MatrixFormat) -> Result<TranspArgs> {
    self.check_room()?;
    let edge = self.config.transp_edge();
    let (tile_rows, dst_rows, dst_cols) = match format {
      MatrixFormat::Cm => (edge, cols, rows),
      MatrixFormat::GvA => {
        let group = self.width() * self.config.transp.m_groups;
        let dst_cols = cols
          .checked_mul(group)
          .ok_or_else(|| GemxError::dimension(format!("interleaved transpose of {} columns overflows", cols)))?;
        (group, rows / group.max(1), dst_cols)
      },
      other => return Err(GemxError::dimension(format!("transpose cannot produce {:?}", other))),
    };
    if rows == 0 || cols == 0 || rows % tile_rows != 0 || cols % edge != 0 {
      return Err(GemxError::dimension(format!(
        "transpose {}x{} is not a multiple of {}x{} tiles",
        rows, cols, tile_rows, edge
      )));
    }
    check_field("rows", rows)?;
    check_field("cols", dst_cols.max(cols))?;
    let src_page = self.operand(src, rows, cols, Some((i64::from(i32::MAX), 0)))?;
    let dst_page = self.operand(dst, dst_rows, dst_cols, None)?;
    let shape = |offset: usize, rows: usize, cols: usize, format: MatrixFormat| MatrixShape {
      offset: offset as u32,
      rows: rows as u32,
      cols: cols as u32,
      ld: cols as u32,
      gf_edge: edge as u32,
      format,
    };
    let args = TranspArgs {
      src: shape(src_page, rows, cols, MatrixFormat::Rm),
      dst: shape(dst_page, dst_rows, dst_cols, format),
    };
    self.place(Instruction::Transpose(args))?;
    Ok(args)
  }

  /// Sparse A (explicit nonzeros) times the dense vector b
  pub fn add_spmv_triplets(
    &mut self,
    a: &str,
    b: &str,
    c: &str,
    m: usize,
    k: usize,
    triplets: &[Triplet<E>],
    act: Option<Activation>,
  ) -> Result<SpmvArgs> {
    self.check_room()?;
    if let Some(act) = &act {
      act.validate()?;
    }
    let sparse = SparseMatrix::partition(&self.config, m, k, triplets)?;
    let g = &sparse.geometry;
    let page_size = self.config.image.page_size;
    let a_elems = sparse.total_pages(page_size) * page_size / E::BYTES;
    let alloc = self.allocator.allocate(&mut self.image, a, a_elems)?;
    if alloc.fresh {
      sparse.write(&mut self.image, alloc.start_page)?;
    }
    let (padded_m, padded_k) = (g.m, g.k);
    let b_page = self.operand(b, padded_k, 1, Some((10, 0)))?;
    let c_page = self.operand(c, padded_m, 1, None)?;
    let args = SpmvArgs {
      a: alloc.start_page as u32,
      b: b_page as u32,
      c: c_page as u32,
      m: padded_m as u32,
      k: padded_k as u32,
      nnz: sparse.nnz() as u32,
      b_blocks: g.b_blocks as u32,
      c_blocks: g.c_blocks as u32,
      desc_pages: g.desc_pages as u32,
      use_activation: act.is_some(),
      activation: act.map(Activation::to_word).unwrap_or(0),
    };
    self.place(Instruction::Spmv(args))?;
    Ok(args)
  }

  /// Sparse A with `nnz` nonzeros in the cycling diagonal placement
  pub fn add_spmv(&mut self, a: &str, b: &str, c: &str, m: usize, k: usize, nnz: usize, act: Option<Activation>) -> Result<SpmvArgs> {
    self.check_room()?;
    let triplets = cycling_triplets::<E>(m, k, nnz)?;
    self.add_spmv_triplets(a, b, c, m, k, &triplets, act)
  }

  pub fn add_request(&mut self, req: &OpRequest) -> Result<Instruction> {
    match req {
      OpRequest::Gemm(g) => {
        let shape = GemmShape::from_request(g);
        let post = PostScale::new(g.scale, g.shift);
        self.add_gemm(&g.a, &g.b, &g.c, g.x.as_deref(), shape, post).map(Instruction::Gemm)
      },
      OpRequest::Fcn { gemm: g, alpha, alpha_shift } => {
        let shape = GemmShape::from_request(g);
        let post = PostScale::new(g.scale, g.shift);
        let act = Activation::new(*alpha, *alpha_shift);
        self.add_fcn(&g.a, &g.b, &g.c, g.x.as_deref(), shape, post, act).map(Instruction::Fcn)
      },
      OpRequest::Gemv { a, b, c, m, k, lda } => self.add_gemv(a, b, c, *m, *k, lda.unwrap_or(*k)).map(Instruction::Gemv),
      OpRequest::Transpose { src, dst, rows, cols, format } => {
        self.add_transpose(src, dst, *rows, *cols, format.format()).map(Instruction::Transpose)
      },
      OpRequest::Spmv { a, b, c, m, k, nnz, activation } => {
        let act = activation.map(|(alpha, shift)| Activation::new(alpha, shift));
        self.add_spmv(a, b, c, *m, *k, *nnz, act).map(Instruction::Spmv)
      },
    }
  }

  /// Pad with no-ops and append the terminal instruction in the last slot
  pub fn finish(mut self) -> Result<BuiltProgram> {
    let slot = self.config.instr_bytes();
    let max = self.config.image.max_instructions;
    for pc in self.instructions.len()..max {
      let ctrl = if pc == max - 1 { ControlArgs::LAST } else { ControlArgs::NOOP };
      let word = Instruction::Control(ctrl).encode(slot)?;
      let offset = self.image.region_address(CODE_PAGE) + pc * slot;
      self.image.slice_mut(offset, slot)?.copy_from_slice(&word);
    }
    log::info!(
      "built program: {} instructions, {} pages",
      self.instructions.len(),
      self.image.num_pages()
    );
    Ok(BuiltProgram {
      image: self.image,
      instructions: self.instructions,
      allocator: self.allocator,
    })
  }
}
