/// Per-instruction execution records kept by the dispatcher
use crate::isa::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecRecord {
  pub pc: usize,
  pub opcode: Opcode,
  pub start: u64,
  pub end: u64,
}

impl ExecRecord {
  pub fn cycles(&self) -> u64 {
    self.end - self.start
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!({
      "pc": self.pc,
      "opcode": self.opcode.name(),
      "start": self.start,
      "end": self.end,
      "cycles": self.cycles(),
    })
  }
}

/// Push an ExecRecord for the current program counter
///
/// Usage:
/// ```ignore
/// exec_record!(self, opcode, start, end);
/// ```
#[macro_export]
macro_rules! exec_record {
  ($self:expr, $opcode:expr, $start:expr, $end:expr) => {
    $self.records.push($crate::dispatch::records::ExecRecord {
      pc: $self.pc,
      opcode: $opcode,
      start: $start,
      end: $end,
    });
  };
}
