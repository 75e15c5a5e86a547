use clap::{Args, Parser, Subcommand};
use gemx::config::{ElementKind, EngineConfig};
use gemx::memory::MemoryImage;
use gemx::numeric::Element;
use gemx::program::{compare_images, reference_image, Program, ProgramFile, Tolerance};
use gemx::simulator::config::{load_and_merge_configs, AppConfig};
use gemx::simulator::utils::log::init_log;
use gemx::simulator::Simulator;
use std::path::{Path, PathBuf};

/// gemx - GEMM/SpMV/transpose accelerator model
#[derive(Parser, Debug)]
#[command(name = "gemx")]
#[command(version = "0.1.0")]
#[command(about = "Cycle-level model of a matrix accelerator", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Build a program from a TOML op list and execute it
  Run(RunArgs),
  /// Compare the data segments of two image files
  Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
  /// Program file with [[op]] tables
  program: PathBuf,

  /// Configuration file layered over the defaults
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress info messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Write the final image here
  #[arg(long, value_name = "FILE")]
  out: Option<PathBuf>,

  /// Write the reference model's image here
  #[arg(long, value_name = "FILE")]
  reference_out: Option<PathBuf>,

  /// Check the result against the reference model
  #[arg(long)]
  golden: bool,
}

#[derive(Args, Debug)]
struct CompareArgs {
  /// Image under test
  got: PathBuf,

  /// Reference image
  want: PathBuf,

  #[arg(long, default_value_t = 1e-3)]
  rtol: f64,

  #[arg(long, default_value_t = 1e-5)]
  atol: f64,

  /// Configuration file supplying page size and element type
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,
}

fn run<E: Element>(app_config: &AppConfig, args: &RunArgs) -> std::io::Result<bool> {
  let engine = app_config.engine();
  let file = ProgramFile::load(&args.program)?;
  let mut program = Program::<E>::new(&engine)?;
  for op in &file.ops {
    program.add_request(op)?;
  }
  let built = program.finish()?;
  if let Some(path) = &args.reference_out {
    reference_image::<E>(&engine, &built.image)?.save(path)?;
  }

  let mut simulator = Simulator::<E>::from_app_config(app_config, built.image)?;
  let summary = simulator.run()?;
  println!(
    "{} slots, {} engine invocations, {} ticks{}",
    summary.executed,
    summary.invocations,
    summary.ticks,
    if summary.terminated { "" } else { " (stopped early)" }
  );
  if let Some(path) = &args.out {
    simulator.image().save(path)?;
  }
  Ok(match summary.report {
    Some(report) => {
      println!("{}", report);
      report.passed()
    },
    None => true,
  })
}

fn compare<E: Element>(engine: &EngineConfig, args: &CompareArgs) -> std::io::Result<bool> {
  let page_size = engine.image.page_size;
  let got = MemoryImage::load(Path::new(&args.got), page_size)?;
  let want = MemoryImage::load(Path::new(&args.want), page_size)?;
  let tol = Tolerance {
    rtol: args.rtol,
    atol: args.atol,
  };
  let report = compare_images::<E>(&got, &want, tol)?;
  println!("{}", report);
  Ok(report.passed())
}

fn main() -> std::io::Result<()> {
  init_log();

  let cli = Cli::parse();

  let passed = match &cli.command {
    Command::Run(args) => {
      let app_config = load_and_merge_configs(
        args.config.as_deref(),
        args.quiet,
        args.step,
        args.trace_file.as_deref(),
        args.golden,
      )?;
      match app_config.image.element {
        ElementKind::I32 => run::<i32>(&app_config, args)?,
        ElementKind::F32 => run::<f32>(&app_config, args)?,
      }
    },
    Command::Compare(args) => {
      let app_config = load_and_merge_configs(args.config.as_deref(), false, false, None, false)?;
      let engine = app_config.engine();
      match engine.image.element {
        ElementKind::I32 => compare::<i32>(&engine, args)?,
        ElementKind::F32 => compare::<f32>(&engine, args)?,
      }
    },
  };

  if !passed {
    std::process::exit(1);
  }
  Ok(())
}
