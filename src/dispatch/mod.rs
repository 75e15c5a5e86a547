/// Fetch, decode, dispatch and timing loop over one memory image
pub mod records;

pub use records::ExecRecord;

use crate::config::EngineConfig;
use crate::dense::DenseEngine;
use crate::error::{GemxError, Result};
use crate::exec_record;
use crate::isa::{Instruction, Opcode, ResultArgs};
use crate::memory::{MemoryImage, CODE_PAGE, RESULT_PAGE};
use crate::numeric::Element;
use crate::sparse::SpmvEngine;
use crate::transpose::TranspEngine;
use std::marker::PhantomData;

/// Ticks charged for a Control instruction
const CONTROL_TICKS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
  Ready,
  Terminated,
  Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
  Executed(ExecRecord),
  Terminated(ExecRecord),
}

/// Owns the image and the program counter; executes one slot per `step`
pub struct Dispatcher<E: Element> {
  config: EngineConfig,
  image: MemoryImage,
  pc: usize,
  tick: u64,
  state: DispatchState,
  dense: DenseEngine,
  sparse: SpmvEngine,
  transp: TranspEngine,
  records: Vec<ExecRecord>,
  _element: PhantomData<E>,
}

impl<E: Element> Dispatcher<E> {
  pub fn new(config: &EngineConfig, image: MemoryImage) -> Result<Self> {
    config.validate()?;
    if config.image.element != E::KIND {
      return Err(GemxError::config(format!(
        "image element {:?} does not match dispatcher element {:?}",
        config.image.element,
        E::KIND
      )));
    }
    if image.page_size() != config.image.page_size || image.num_pages() <= RESULT_PAGE {
      return Err(GemxError::CorruptImage {
        len: image.len(),
        page_size: config.image.page_size,
      });
    }
    Ok(Self {
      config: config.clone(),
      image,
      pc: 0,
      tick: 0,
      state: DispatchState::Ready,
      dense: DenseEngine::new(config),
      sparse: SpmvEngine::new(config),
      transp: TranspEngine::new(config),
      records: Vec::new(),
      _element: PhantomData,
    })
  }

  pub fn pc(&self) -> usize {
    self.pc
  }

  pub fn tick(&self) -> u64 {
    self.tick
  }

  pub fn state(&self) -> DispatchState {
    self.state
  }

  pub fn records(&self) -> &[ExecRecord] {
    &self.records
  }

  pub fn image(&self) -> &MemoryImage {
    &self.image
  }

  pub fn into_image(self) -> MemoryImage {
    self.image
  }

  /// Engine invocations so far, Control excluded
  pub fn invocations(&self) -> u64 {
    self.dense.invocations() + self.sparse.invocations() + self.transp.invocations()
  }

  fn slot_offset(&self, page: usize, pc: usize) -> usize {
    self.image.region_address(page) + pc * self.config.instr_bytes()
  }

  fn fetch(&self) -> Result<Instruction> {
    let slot = self.config.instr_bytes();
    let bytes = self.image.slice(self.slot_offset(CODE_PAGE, self.pc), slot)?;
    Instruction::decode(bytes)
  }

  fn execute(&mut self, instr: &Instruction) -> Result<u64> {
    let last_slot = self.config.image.max_instructions - 1;
    let image = &mut self.image;
    match instr {
      Instruction::Control(ctrl) => {
        if ctrl.is_last && self.pc != last_slot {
          return Err(GemxError::format(format!(
            "terminal instruction at slot {}, expected slot {}",
            self.pc, last_slot
          )));
        }
        Ok(CONTROL_TICKS)
      },
      Instruction::Gemm(args) => self.dense.run_gemm::<E>(image, args),
      Instruction::Fcn(args) => self.dense.run_fcn::<E>(image, args),
      Instruction::Gemv(args) => self.dense.run_gemv::<E>(image, args),
      Instruction::Transpose(args) => self.transp.execute::<E>(image, args),
      Instruction::Spmv(args) => self.sparse.execute::<E>(image, args),
      Instruction::Result(_) => Err(GemxError::InvalidOpcode {
        tag: Opcode::Result.tag(),
      }),
    }
  }

  fn record_timing(&mut self, start: u64, end: u64) -> Result<()> {
    let slot = self.config.instr_bytes();
    let word = Instruction::Result(ResultArgs { start, end }).encode(slot)?;
    let offset = self.slot_offset(RESULT_PAGE, self.pc);
    self.image.slice_mut(offset, slot)?.copy_from_slice(&word);
    Ok(())
  }

  fn step_inner(&mut self) -> Result<StepOutcome> {
    let last_slot = self.config.image.max_instructions - 1;
    let instr = self.fetch()?;
    let start = self.tick;
    let cycles = self.execute(&instr)?;
    self.tick += cycles;
    let end = self.tick;
    self.record_timing(start, end)?;
    exec_record!(self, instr.opcode(), start, end);
    let record = self.records[self.records.len() - 1];
    log::info!(
      "[{:>3}] {:<9} ticks {}..{} ({} cycles)",
      self.pc,
      instr.opcode().name(),
      start,
      end,
      cycles
    );

    let terminal = matches!(instr, Instruction::Control(c) if c.is_last);
    if !terminal && self.pc == last_slot {
      return Err(GemxError::format(format!("code segment of {} slots ends without a terminal instruction", last_slot + 1)));
    }
    self.pc += 1;
    if terminal {
      self.state = DispatchState::Terminated;
      Ok(StepOutcome::Terminated(record))
    } else {
      Ok(StepOutcome::Executed(record))
    }
  }

  /// Execute exactly one slot. Any error halts the dispatcher for good.
  pub fn step(&mut self) -> Result<StepOutcome> {
    match self.state {
      DispatchState::Ready => {},
      DispatchState::Terminated => return Err(GemxError::format("program already terminated")),
      DispatchState::Halted => return Err(GemxError::format("dispatcher halted by an earlier error")),
    }
    self.step_inner().map_err(|err| {
      log::error!("halt at slot {}: {}", self.pc, err);
      self.state = DispatchState::Halted;
      err
    })
  }

  /// Run to the terminal instruction; returns the final tick
  pub fn run(&mut self) -> Result<u64> {
    while self.state == DispatchState::Ready {
      self.step()?;
    }
    Ok(self.tick)
  }
}

/// Decode the Result record written for slot `pc`
pub fn read_result(config: &EngineConfig, image: &MemoryImage, pc: usize) -> Result<ResultArgs> {
  let slot = config.instr_bytes();
  let bytes = image.slice(image.region_address(RESULT_PAGE) + pc * slot, slot)?;
  match Instruction::decode(bytes)? {
    Instruction::Result(args) => Ok(args),
    other => Err(GemxError::format(format!("result slot {} holds {:?}", pc, other.opcode()))),
  }
}
