/// Deterministic operand fill patterns
use crate::error::{GemxError, Result};
use crate::numeric::Element;
use crate::sparse::Triplet;

/// Value period of generated nonzeros
pub const NNZ_VALUE_MOD: i64 = 17;

/// Places `nnz` nonzeros along successive diagonals. Each walk starts at the top edge
/// (wide matrices) or the left edge (tall ones) one step further in than the last, and
/// stops when it leaves the matrix. Value `i` is `(i + 1) % 17`.
pub fn cycling_triplets<E: Element>(rows: usize, cols: usize, nnz: usize) -> Result<Vec<Triplet<E>>> {
  if nnz == 0 {
    return Err(GemxError::EmptyMatrix);
  }
  if rows == 0 || cols == 0 {
    return Err(GemxError::dimension(format!("cannot place nonzeros in a {}x{} matrix", rows, cols)));
  }
  let mut out = Vec::with_capacity(nnz);
  let (mut row, mut col) = (0usize, 0usize);
  let mut add_step = 1usize;
  for i in 0..nnz {
    if row >= rows || col >= cols {
      return Err(GemxError::dimension(format!(
        "{} nonzeros do not fit the diagonal walk of a {}x{} matrix",
        nnz, rows, cols
      )));
    }
    out.push(Triplet {
      row,
      col,
      value: E::from_i64((i as i64 + 1) % NNZ_VALUE_MOD),
    });
    row += 1;
    col += 1;
    if col >= cols || row >= rows {
      if cols > rows {
        row = 0;
        col = add_step;
      } else {
        col = 0;
        row = add_step;
      }
      add_step += 1;
    }
  }
  Ok(out)
}
