use gemx::config::{ElementKind, EngineConfig};
use gemx::dispatch::{read_result, DispatchState, Dispatcher, StepOutcome};
use gemx::isa::{
  ControlArgs, FcnArgs, GemmArgs, GemvArgs, Instruction, MatrixFormat, MatrixShape, ResultArgs, SpmvArgs, TranspArgs,
};
use gemx::memory::{MemoryImage, CODE_PAGE};
use gemx::numeric::{Activation, PostScale};
use gemx::program::{GemmShape, Program};
use gemx::simulator::utils::log::init_log;
use gemx::GemxError;

fn small_config(slots: usize) -> EngineConfig {
  let mut config = EngineConfig::new();
  config.image.max_instructions = slots;
  config
}

fn write_slot(config: &EngineConfig, image: &mut MemoryImage, pc: usize, bytes: &[u8]) {
  let slot = config.instr_bytes();
  let offset = image.region_address(CODE_PAGE) + pc * slot;
  image.slice_mut(offset, slot).unwrap().copy_from_slice(bytes);
}

fn place(config: &EngineConfig, image: &mut MemoryImage, pc: usize, instr: Instruction) {
  let word = instr.encode(config.instr_bytes()).unwrap();
  write_slot(config, image, pc, &word);
}

fn sample_gemm() -> GemmArgs {
  GemmArgs {
    a: 2,
    b: 6,
    c: 10,
    x: 14,
    m: 64,
    k: 32,
    n: 48,
    lda: 32,
    ldb: 48,
    ldc: 48,
    ldx: 48,
    post_scale: PostScale::new(-5, 9).to_word(),
  }
}

#[test]
fn every_instruction_survives_the_image() {
  let config = EngineConfig::new();
  let shape = |offset, rows, cols, format| MatrixShape {
    offset,
    rows,
    cols,
    ld: cols,
    gf_edge: 32,
    format,
  };
  let instrs = vec![
    Instruction::Control(ControlArgs::NOOP),
    Instruction::Gemv(GemvArgs {
      a: 3,
      b: 9,
      c: 11,
      m: 16,
      k: 64,
      lda: 80,
    }),
    Instruction::Gemm(sample_gemm()),
    Instruction::Fcn(FcnArgs {
      gemm: sample_gemm(),
      activation: Activation::new(-7, 3).to_word(),
    }),
    Instruction::Transpose(TranspArgs {
      src: shape(4, 32, 64, MatrixFormat::Rm),
      dst: shape(8, 2, 1024, MatrixFormat::GvA),
    }),
    Instruction::Spmv(SpmvArgs {
      a: 20,
      b: 30,
      c: 31,
      m: 96,
      k: 128,
      nnz: 260,
      b_blocks: 2,
      c_blocks: 1,
      desc_pages: 1,
      use_activation: true,
      activation: Activation::RELU.to_word(),
    }),
    Instruction::Result(ResultArgs {
      start: 7,
      end: u64::MAX - 1,
    }),
    Instruction::Control(ControlArgs::LAST),
  ];
  let mut image = MemoryImage::new(config.image.page_size);
  for (pc, instr) in instrs.iter().enumerate() {
    place(&config, &mut image, pc, *instr);
  }
  let restored = MemoryImage::from_bytes(image.clone().into_bytes(), config.image.page_size).unwrap();
  assert_eq!(restored, image);
  let slot = config.instr_bytes();
  for (pc, instr) in instrs.iter().enumerate() {
    let decoded = Instruction::decode(restored.slice(pc * slot, slot).unwrap()).unwrap();
    assert_eq!(&decoded, instr, "slot {}", pc);
  }
}

#[test]
fn corrupt_image_rejected() {
  let err = MemoryImage::from_bytes(vec![0; 4096 * 2 + 1], 4096).unwrap_err();
  assert!(matches!(err, GemxError::CorruptImage { .. }));
  assert!(MemoryImage::from_bytes(Vec::new(), 4096).is_err());
}

#[test]
fn terminal_before_last_slot_halts() {
  init_log();
  let config = small_config(4);
  let mut image = MemoryImage::new(config.image.page_size);
  place(&config, &mut image, 0, Instruction::Control(ControlArgs::NOOP));
  place(&config, &mut image, 1, Instruction::Control(ControlArgs::LAST));
  let mut disp = Dispatcher::<i32>::new(&config, image).unwrap();
  assert!(matches!(disp.step(), Ok(StepOutcome::Executed(_))));
  assert!(matches!(disp.step(), Err(GemxError::ProgramFormat { .. })));
  assert_eq!(disp.state(), DispatchState::Halted);
  // the halt is permanent
  assert!(disp.run().is_err());
  assert_eq!(disp.pc(), 1);
}

#[test]
fn missing_terminal_halts_at_last_slot() {
  init_log();
  let config = small_config(3);
  let mut image = MemoryImage::new(config.image.page_size);
  for pc in 0..3 {
    place(&config, &mut image, pc, Instruction::Control(ControlArgs::NOOP));
  }
  let mut disp = Dispatcher::<i32>::new(&config, image).unwrap();
  assert!(matches!(disp.run(), Err(GemxError::ProgramFormat { .. })));
  assert_eq!(disp.records().len(), 3);
}

#[test]
fn unknown_and_reserved_tags_halt() {
  init_log();
  let config = small_config(2);
  for tag in [6u32, 9, 0xffff_ffff] {
    let mut image = MemoryImage::new(config.image.page_size);
    let mut slot = vec![0u8; config.instr_bytes()];
    slot[..4].copy_from_slice(&tag.to_le_bytes());
    write_slot(&config, &mut image, 0, &slot);
    place(&config, &mut image, 1, Instruction::Control(ControlArgs::LAST));
    let mut disp = Dispatcher::<i32>::new(&config, image).unwrap();
    match disp.run() {
      Err(GemxError::InvalidOpcode { tag: got }) => assert_eq!(got, tag),
      other => panic!("tag {}: unexpected {:?}", tag, other),
    }
  }

  // a Result record in the code segment is not executable either
  let mut image = MemoryImage::new(config.image.page_size);
  place(&config, &mut image, 0, Instruction::Result(ResultArgs { start: 0, end: 1 }));
  place(&config, &mut image, 1, Instruction::Control(ControlArgs::LAST));
  let mut disp = Dispatcher::<i32>::new(&config, image).unwrap();
  assert!(matches!(disp.run(), Err(GemxError::InvalidOpcode { tag: 5 })));
}

#[test]
fn out_of_image_operand_halts() {
  init_log();
  let config = small_config(2);
  let mut image = MemoryImage::new(config.image.page_size);
  let mut args = sample_gemm();
  args.x = 0;
  place(&config, &mut image, 0, Instruction::Gemm(args));
  place(&config, &mut image, 1, Instruction::Control(ControlArgs::LAST));
  let mut disp = Dispatcher::<i32>::new(&config, image).unwrap();
  assert!(matches!(disp.run(), Err(GemxError::DimensionConstraint { .. })));
  assert_eq!(disp.invocations(), 0);
}

#[test]
fn oversized_operand_fields_halt() {
  init_log();
  let config = small_config(2);
  let huge = u32::MAX;
  let gemm = GemmArgs {
    a: 2,
    b: 2,
    c: 2,
    x: 0,
    m: huge,
    k: huge,
    n: 16,
    lda: huge,
    ldb: 16,
    ldc: 16,
    ldx: 0,
    post_scale: PostScale::IDENTITY.to_word(),
  };
  let edge = huge - 31;
  let shape = |rows, cols, format| MatrixShape {
    offset: 2,
    rows,
    cols,
    ld: cols,
    gf_edge: 32,
    format,
  };
  let transpose = TranspArgs {
    src: shape(edge, edge, MatrixFormat::Rm),
    dst: shape(edge, edge, MatrixFormat::Cm),
  };

  for instr in [Instruction::Gemm(gemm), Instruction::Transpose(transpose)] {
    let mut image = MemoryImage::new(config.image.page_size);
    place(&config, &mut image, 0, instr);
    place(&config, &mut image, 1, Instruction::Control(ControlArgs::LAST));
    let mut disp = Dispatcher::<i32>::new(&config, image).unwrap();
    match disp.run() {
      Err(GemxError::AddressOutOfRange { .. }) => {},
      other => panic!("{:?}: unexpected {:?}", instr.opcode(), other),
    }
    assert_eq!(disp.state(), DispatchState::Halted);
    assert_eq!(disp.invocations(), 0);
  }
}

#[test]
fn element_type_must_match_config() {
  let mut config = small_config(2);
  config.image.element = ElementKind::F32;
  let image = MemoryImage::new(config.image.page_size);
  assert!(matches!(Dispatcher::<i32>::new(&config, image), Err(GemxError::Config { .. })));
}

#[test]
fn step_by_step_matches_run() {
  init_log();
  let config = small_config(4);
  let build = || {
    let mut program = Program::<i32>::new(&config).unwrap();
    program
      .add_gemm("A", "B", "C", None, GemmShape::new(16, 16, 16), PostScale::IDENTITY)
      .unwrap();
    program.add_gemv("A", "x", "y", 16, 16, 16).unwrap();
    program.finish().unwrap().image
  };

  let mut batch = Dispatcher::<i32>::new(&config, build()).unwrap();
  let ticks = batch.run().unwrap();

  let mut stepped = Dispatcher::<i32>::new(&config, build()).unwrap();
  let mut outcomes = Vec::new();
  while stepped.state() == DispatchState::Ready {
    outcomes.push(stepped.step().unwrap());
  }
  assert_eq!(outcomes.len(), 4);
  assert!(matches!(outcomes[3], StepOutcome::Terminated(_)));
  assert_eq!(stepped.tick(), ticks);
  assert_eq!(stepped.image(), batch.image());
  for pc in 0..4 {
    assert_eq!(
      read_result(&config, stepped.image(), pc).unwrap(),
      read_result(&config, batch.image(), pc).unwrap()
    );
  }
  // stepping past termination is refused
  assert!(stepped.step().is_err());
}
