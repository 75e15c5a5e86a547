use gemx::config::{ElementKind, EngineConfig};
use gemx::dispatch::{read_result, Dispatcher};
use gemx::isa::{MatrixFormat, Opcode};
use gemx::memory::{MatrixDesc, MemoryImage, PageAllocator};
use gemx::numeric::{Element, PostScale};
use gemx::program::fill::cycling_triplets;
use gemx::program::{classify, GemmShape, Program, ProgramFile, Tolerance, Verdict};
use gemx::simulator::config::AppConfig;
use gemx::simulator::utils::log::init_log;
use gemx::simulator::Simulator;
use gemx::GemxError;
use std::sync::Mutex;

// Global mutex so the per-instruction log of one run is not interleaved with another
static TEST_MUTEX: Mutex<()> = Mutex::new(());

fn app_config(element: ElementKind) -> AppConfig {
  let mut config = AppConfig::default();
  config.image.element = element;
  config.simulation.quiet = true;
  config.simulation.golden = true;
  config
}

/// Build the program, run it to termination and check it against the reference model
fn run_golden<E: Element>(config: &AppConfig, program_text: &str) {
  let file = ProgramFile::parse(program_text).expect("Failed to parse program");
  let mut program = Program::<E>::new(&config.engine()).expect("Failed to create program");
  for op in &file.ops {
    program.add_request(op).expect("Failed to add op");
  }
  let built = program.finish().expect("Failed to finish program");
  let mut simulator = Simulator::<E>::from_app_config(config, built.image).expect("Failed to create simulator");
  let summary = simulator.run().expect("Simulator run failed");
  assert!(summary.terminated);
  assert_eq!(summary.invocations, file.ops.len() as u64);
  let report = summary.report.expect("golden check did not run");
  assert!(report.passed(), "{}", report);
  if E::KIND == ElementKind::I32 {
    assert_eq!(report.within, 0, "integer runs must be bit-exact");
  }
}

macro_rules! test_case {
  (large $name:ident, $element:ty, $kind:expr, $program:literal) => {
    #[test]
    #[cfg(feature = "large-tests")]
    fn $name() {
      let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
      init_log();
      run_golden::<$element>(&app_config($kind), $program);
    }
  };
  ($name:ident, $element:ty, $kind:expr, $program:literal) => {
    #[test]
    fn $name() {
      let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
      init_log();
      run_golden::<$element>(&app_config($kind), $program);
    }
  };
}

// ---------------------------------
// golden runs
// ---------------------------------

test_case!(gemm_32_i32, i32, ElementKind::I32, "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nm = 32\nk = 32\nn = 32\n");
test_case!(
  gemm_bias_rescale_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nx = \"X\"\nm = 32\nk = 48\nn = 64\nscale = 3\nshift = 4\n"
);
test_case!(
  fcn_chain_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nm = 32\nk = 32\nn = 32\n\n[[op]]\nkind = \"fcn\"\na = \"C\"\nb = \"B\"\nc = \"D\"\nm = 32\nk = 32\nn = 32\nscale = 1\nshift = 10\nalpha = -3\nalpha_shift = 1\n"
);
test_case!(
  gemv_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"gemv\"\na = \"A\"\nb = \"x\"\nc = \"y\"\nm = 48\nk = 64\n"
);
test_case!(
  leading_dims_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nm = 16\nk = 32\nn = 16\nlda = 48\nldb = 32\nldc = 32\n"
);
test_case!(
  spmv_relu_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"spmv\"\na = \"S\"\nb = \"v\"\nc = \"w\"\nm = 96\nk = 128\nnnz = 256\nactivation = [0, 0]\n"
);
test_case!(gemm_32_f32, f32, ElementKind::F32, "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nm = 32\nk = 32\nn = 32\n");
test_case!(
  spmv_f32,
  f32,
  ElementKind::F32,
  "[[op]]\nkind = \"spmv\"\na = \"S\"\nb = \"v\"\nc = \"w\"\nm = 96\nk = 128\nnnz = 256\n"
);
test_case!(
  large gemm_128_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nm = 128\nk = 128\nn = 128\n"
);
test_case!(
  large spmv_multi_block_i32,
  i32,
  ElementKind::I32,
  "[[op]]\nkind = \"spmv\"\na = \"S\"\nb = \"v\"\nc = \"w\"\nm = 512\nk = 256\nnnz = 2048\n"
);

// ---------------------------------
// numbered scenarios
// ---------------------------------

#[test]
fn scenario_dense_32_exact() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  let config = EngineConfig::new();
  let mut program = Program::<i32>::new(&config).unwrap();
  let args = program
    .add_gemm("A", "B", "C", Some("X"), GemmShape::new(32, 32, 32), PostScale::IDENTITY)
    .unwrap();
  let built = program.finish().unwrap();
  let mut disp = Dispatcher::<i32>::new(&config, built.image).unwrap();
  disp.run().unwrap();

  let a = MatrixDesc::new(args.a as usize, 32, 32, 32);
  let b = MatrixDesc::new(args.b as usize, 32, 32, 32);
  let c = MatrixDesc::new(args.c as usize, 32, 32, 32);
  let image = disp.image();
  for i in 0..32 {
    for j in 0..32 {
      let mut acc = 0i64;
      for l in 0..32 {
        let (av, bv) = (a.get::<i32>(image, i, l).unwrap(), b.get::<i32>(image, l, j).unwrap());
        assert_eq!(av as usize, (i * 32 + l + 1) % 67);
        assert_eq!(bv as usize, (l * 32 + j + 65) % 129);
        acc += av as i64 * bv as i64;
      }
      assert_eq!(c.get::<i32>(image, i, j).unwrap(), acc as i32, "C[{}][{}]", i, j);
    }
  }
}

#[test]
fn scenario_sparse_96x128() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  let mut config = EngineConfig::new();
  config.image.element = ElementKind::F32;
  let mut program = Program::<f32>::new(&config).unwrap();
  let args = program.add_spmv("A", "B", "C", 96, 128, 256, None).unwrap();
  assert_eq!((args.m, args.k, args.b_blocks, args.c_blocks), (96, 128, 2, 1));
  let built = program.finish().unwrap();
  let mut disp = Dispatcher::<f32>::new(&config, built.image).unwrap();
  disp.run().unwrap();

  let mut want = vec![0f64; 96];
  for t in cycling_triplets::<f32>(96, 128, 256).unwrap() {
    want[t.row] += t.value as f64 * (t.col % 10) as f64;
  }
  let c = MatrixDesc::vector(args.c as usize, 96);
  for (row, expected) in want.iter().enumerate() {
    let got = c.get::<f32>(disp.image(), row, 0).unwrap();
    assert_ne!(
      classify(got, *expected as f32, Tolerance::default()),
      Verdict::Mismatch,
      "row {}: got {} want {}",
      row,
      got,
      expected
    );
  }
}

#[test]
fn scenario_reallocation() {
  let mut image = MemoryImage::new(4096);
  let mut alloc = PageAllocator::new(4);
  let first = alloc.allocate(&mut image, "A", 32 * 32).unwrap();
  let pages = image.num_pages();
  let second = alloc.allocate(&mut image, "A", 32 * 32).unwrap();
  assert_eq!(first.start_page, second.start_page);
  assert!(first.fresh && !second.fresh);
  assert_eq!(image.num_pages(), pages);
  let err = alloc.allocate(&mut image, "A", 32 * 33).unwrap_err();
  assert!(matches!(err, GemxError::SizeMismatch { .. }));
}

#[test]
fn scenario_three_instructions() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  let config = EngineConfig::new();
  let mut program = Program::<i32>::new(&config).unwrap();
  program
    .add_gemm("A", "B", "C", None, GemmShape::new(32, 32, 32), PostScale::IDENTITY)
    .unwrap();
  program.add_spmv("S", "v", "w", 96, 128, 256, None).unwrap();
  program.add_transpose("C", "CT", 32, 32, MatrixFormat::Cm).unwrap();
  let built = program.finish().unwrap();

  let mut disp = Dispatcher::<i32>::new(&config, built.image).unwrap();
  let ticks = disp.run().unwrap();
  assert_eq!(disp.invocations(), 3);
  assert_eq!(disp.records().len(), config.image.max_instructions);

  let mut prev_end = 0;
  for pc in 0..config.image.max_instructions {
    let result = read_result(&config, disp.image(), pc).unwrap();
    assert_eq!(result.start, prev_end);
    assert!(result.start <= result.end);
    prev_end = result.end;
  }
  assert_eq!(prev_end, ticks);
  let engines = disp.records().iter().filter(|r| r.opcode != Opcode::Control).count();
  assert_eq!(engines, 3);
}

// ---------------------------------
// non-default geometries
// ---------------------------------

/// Dense program exercising bias, rescale, activation and the vector path at `(m, k, n)`
fn dense_program(m: usize, k: usize, n: usize) -> String {
  format!(
    "[[op]]\nkind = \"gemm\"\na = \"A\"\nb = \"B\"\nc = \"C\"\nx = \"X\"\nm = {m}\nk = {k}\nn = {n}\nscale = 3\nshift = 4\n\n\
     [[op]]\nkind = \"fcn\"\na = \"A\"\nb = \"B\"\nc = \"D\"\nm = {m}\nk = {k}\nn = {n}\nshift = 6\nalpha = -3\nalpha_shift = 1\n\n\
     [[op]]\nkind = \"gemv\"\na = \"A\"\nb = \"v\"\nc = \"w\"\nm = {m}\nk = {k}\n"
  )
}

#[test]
fn dense_blocking_geometries() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  // (ddr_width, row_words, col_words, k_words, instr_width, page_size, (m, k, n))
  let cases = [
    (4, 3, 1, 2, 4, 4096, (24, 36, 20)),
    (4, 1, 3, 3, 4, 4096, (20, 28, 36)),
    (3, 1, 1, 1, 5, 3072, (24, 36, 21)),
  ];
  for (w, row_words, col_words, k_words, instr_width, page_size, (m, k, n)) in cases {
    println!("dense W={} blocks {}x{}x{} on {}x{}x{}", w, row_words, col_words, k_words, m, k, n);
    let mut config = app_config(ElementKind::I32);
    config.image.ddr_width = w;
    config.image.instr_width = instr_width;
    config.image.page_size = page_size;
    config.image.max_instructions = 8;
    config.gemm.row_words = row_words;
    config.gemm.col_words = col_words;
    config.gemm.k_words = k_words;
    run_golden::<i32>(&config, &dense_program(m, k, n));
  }
}

#[test]
fn sparse_lane_geometries() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  // (lanes, mac_groups, row_break, c_block_rows, b_block_cols)
  let cases = [(3, 2, 1, 96, 48), (5, 1, 3, 80, 40), (3, 1, 16, 96, 63)];
  for (lanes, mac_groups, row_break, c_block_rows, b_block_cols) in cases {
    println!("spmv lanes={} groups={} row_break={}", lanes, mac_groups, row_break);
    let mut config = app_config(ElementKind::I32);
    config.spmv.lanes = lanes;
    config.spmv.mac_groups = mac_groups;
    config.spmv.row_break = row_break;
    config.spmv.c_block_rows = c_block_rows;
    config.spmv.b_block_cols = b_block_cols;
    run_golden::<i32>(
      &config,
      "[[op]]\nkind = \"spmv\"\na = \"S\"\nb = \"v\"\nc = \"w\"\nm = 96\nk = 128\nnnz = 256\nactivation = [2, 1]\n",
    );
  }
}

#[test]
fn transpose_group_geometries() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  // (ddr_width, instr_width, m_groups, rows, cols)
  let cases = [(16, 1, 2, 64, 64), (8, 2, 2, 32, 48), (8, 2, 3, 48, 32)];
  for (w, instr_width, m_groups, rows, cols) in cases {
    println!("transpose W={} m_groups={} on {}x{}", w, m_groups, rows, cols);
    let mut config = app_config(ElementKind::I32);
    config.image.ddr_width = w;
    config.image.instr_width = instr_width;
    config.transp.m_groups = m_groups;
    let program = format!(
      "[[op]]\nkind = \"transpose\"\nsrc = \"S\"\ndst = \"G\"\nrows = {rows}\ncols = {cols}\nformat = \"gva\"\n\n\
       [[op]]\nkind = \"transpose\"\nsrc = \"S\"\ndst = \"T\"\nrows = {rows}\ncols = {cols}\nformat = \"cm\"\n"
    );
    run_golden::<i32>(&config, &program);
  }
}

#[test]
fn trace_file_has_one_line_per_slot() {
  let _guard = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
  init_log();
  let path = std::env::temp_dir().join(format!("gemx_trace_{}.jsonl", std::process::id()));
  let mut config = app_config(ElementKind::I32);
  config.image.max_instructions = 4;
  config.simulation.trace_file = path.display().to_string();
  let mut program = Program::<i32>::new(&config.engine()).unwrap();
  program.add_gemv("A", "x", "y", 16, 16, 16).unwrap();
  let built = program.finish().unwrap();
  let mut simulator = Simulator::<i32>::from_app_config(&config, built.image).unwrap();
  let summary = simulator.run().unwrap();
  assert_eq!(summary.trace_lines, 4);
  assert_eq!(summary.trace_lines, summary.executed as u64);
  let text = std::fs::read_to_string(&path).unwrap();
  let _ = std::fs::remove_file(&path);
  assert_eq!(text.lines().count(), 4);
  for line in text.lines() {
    let record: serde_json::Value = serde_json::from_str(line).unwrap();
    assert!(record.get("opcode").is_some(), "{}", line);
  }
}
