/// Straightforward software evaluation of a program, used as the golden model
use crate::config::EngineConfig;
use crate::error::{GemxError, Result};
use crate::isa::{Instruction, MatrixFormat, Opcode, SpmvArgs, TranspArgs};
use crate::memory::{MatrixDesc, MemoryImage, CODE_PAGE};
use crate::numeric::{activation, post_process, Element};
use crate::sparse::{layout::read_entries, BlockDesc};
use crate::dense::DenseOp;

/// Run every instruction of `image` in order on a copy and return the copy.
/// Timing records are not produced.
pub fn reference_image<E: Element>(config: &EngineConfig, image: &MemoryImage) -> Result<MemoryImage> {
  let mut out = image.clone();
  let slot = config.instr_bytes();
  for pc in 0..config.image.max_instructions {
    let offset = out.region_address(CODE_PAGE) + pc * slot;
    let instr = Instruction::decode(out.slice(offset, slot)?)?;
    match &instr {
      Instruction::Control(ctrl) if ctrl.is_last => return Ok(out),
      Instruction::Control(_) => {},
      Instruction::Gemm(args) => dense::<E>(&mut out, &DenseOp::gemm(args))?,
      Instruction::Fcn(args) => dense::<E>(&mut out, &DenseOp::fcn(args))?,
      Instruction::Gemv(args) => dense::<E>(&mut out, &DenseOp::gemv(args))?,
      Instruction::Transpose(args) => transpose::<E>(config, &mut out, args)?,
      Instruction::Spmv(args) => spmv::<E>(config, &mut out, args)?,
      Instruction::Result(_) => {
        return Err(GemxError::InvalidOpcode {
          tag: Opcode::Result.tag(),
        })
      },
    }
    log::trace!("reference slot {}: {}", pc, instr.opcode().name());
  }
  Err(GemxError::format("reference run found no terminal instruction"))
}

fn dense<E: Element>(image: &mut MemoryImage, op: &DenseOp) -> Result<()> {
  let (m, k, n) = op.dims();
  let a = op.a.to_rows::<E>(image)?;
  let b = op.b.to_rows::<E>(image)?;
  let bias = op.x.as_ref().map(|x| x.to_rows::<E>(image)).transpose()?;
  for i in 0..m {
    for j in 0..n {
      let mut acc = E::Acc::default();
      for l in 0..k {
        acc += E::mul_wide(a[i][l], b[l][j]);
      }
      let x = bias.as_ref().map(|rows| rows[i][j]);
      op.c.set(image, i, j, post_process::<E>(acc, x, op.post, op.act))?;
    }
  }
  Ok(())
}

fn transpose<E: Element>(config: &EngineConfig, image: &mut MemoryImage, args: &TranspArgs) -> Result<()> {
  let (src, dst) = (&args.src, &args.dst);
  let group = (config.image.ddr_width * config.transp.m_groups).max(1);
  let view = MatrixDesc::new(src.offset as usize, src.rows as usize, src.cols as usize, src.ld as usize);
  let out = MatrixDesc::new(dst.offset as usize, dst.rows as usize, dst.cols as usize, dst.ld as usize);
  let rows = view.to_rows::<E>(image)?;
  for (r, row) in rows.iter().enumerate() {
    for (c, value) in row.iter().enumerate() {
      let (dr, dc) = match dst.format {
        MatrixFormat::Cm => (c, r),
        MatrixFormat::GvA => (r / group, c * group + r % group),
        other => return Err(GemxError::dimension(format!("unsupported transpose destination {:?}", other))),
      };
      out.set(image, dr, dc, *value)?;
    }
  }
  Ok(())
}

fn spmv<E: Element>(config: &EngineConfig, image: &mut MemoryImage, args: &SpmvArgs) -> Result<()> {
  let (m, k) = (args.m as usize, args.k as usize);
  let b = MatrixDesc::vector(args.b as usize, k);
  let c = MatrixDesc::vector(args.c as usize, m);
  let a_page = args.a as usize;
  let entries_page = a_page + args.desc_pages as usize;
  let (b_blocks, c_blocks) = (args.b_blocks as usize, args.c_blocks as usize);
  let (block_rows, block_cols) = (config.spmv.c_block_rows, config.spmv.b_block_cols);

  let vector: Vec<E> = (0..k).map(|i| b.get(image, i, 0)).collect::<Result<_>>()?;
  let mut acc = vec![E::Acc::default(); m];
  for bb in 0..b_blocks {
    for cb in 0..c_blocks {
      let desc = BlockDesc::read(image, a_page, bb * c_blocks + cb)?;
      for nz in read_entries::<E>(image, entries_page, desc)? {
        let row = cb * block_rows + nz.row as usize;
        let col = bb * block_cols + nz.col as usize;
        if let (Some(slot), Some(x)) = (acc.get_mut(row), vector.get(col)) {
          *slot += E::mul_wide(nz.value, *x);
        }
      }
    }
  }
  for (row, sum) in acc.into_iter().enumerate() {
    let mut value = E::narrow(sum);
    if let Some(act) = args.act() {
      value = E::narrow(activation::<E>(value.widen(), act));
    }
    c.set(image, row, 0, value)?;
  }
  Ok(())
}
