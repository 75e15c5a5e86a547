use super::config::AppConfig;
use super::sim::mode::{SimConfig, StepMode};
use super::sim::shell::{Command, Shell};
use super::sim::TraceWriter;
use super::utils::log::set_quiet;
use crate::config::EngineConfig;
use crate::dispatch::{DispatchState, Dispatcher, StepOutcome};
use crate::error::Result;
use crate::memory::MemoryImage;
use crate::numeric::Element;
use crate::program::{compare_images, reference_image, CompareReport, Tolerance};

/// What a finished (or abandoned) run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
  pub ticks: u64,
  pub executed: usize,
  pub invocations: u64,
  pub terminated: bool,
  /// JSON lines written to the trace file, 0 without one
  pub trace_lines: u64,
  /// filled in when the golden check ran
  pub report: Option<CompareReport>,
}

pub struct Simulator<E: Element> {
  config: SimConfig,
  engine: EngineConfig,
  dispatcher: Dispatcher<E>,
  trace: TraceWriter,
  initial: Option<MemoryImage>,
}

impl<E: Element> Simulator<E> {
  pub fn new(config: SimConfig, engine: &EngineConfig, image: MemoryImage) -> Result<Self> {
    let trace = TraceWriter::create(config.trace_file.as_deref())?;
    let initial = config.golden.then(|| image.clone());
    let dispatcher = Dispatcher::new(engine, image)?;
    Ok(Self {
      config,
      engine: engine.clone(),
      dispatcher,
      trace,
      initial,
    })
  }

  pub fn from_app_config(app_config: &AppConfig, image: MemoryImage) -> Result<Self> {
    Self::new(SimConfig::from_app_config(app_config), &app_config.engine(), image)
  }

  pub fn dispatcher(&self) -> &Dispatcher<E> {
    &self.dispatcher
  }

  pub fn image(&self) -> &MemoryImage {
    self.dispatcher.image()
  }

  pub fn into_image(self) -> MemoryImage {
    self.dispatcher.into_image()
  }

  pub fn run(&mut self) -> Result<RunSummary> {
    set_quiet(self.config.quiet);
    match self.config.step_mode {
      StepMode::Continuous => self.run_continuous()?,
      StepMode::Step => self.run_step_mode()?,
    }
    self.trace.flush()?;
    if self.trace.is_enabled() {
      log::info!("wrote {} trace lines", self.trace.lines());
    }
    self.summary()
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode - Enter steps one instruction, 'si N' steps N, 'c' continues, 'q' quits");
    let mut shell = Shell::new()?;
    while self.dispatcher.state() == DispatchState::Ready {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if self.step()? {
              break;
            }
          }
        },
        Command::Continue => return self.run_continuous(),
        Command::Quit => break,
      }
    }
    Ok(())
  }

  fn run_continuous(&mut self) -> Result<()> {
    while !self.step()? {}
    Ok(())
  }

  /// Execute one slot and trace it; true once the terminal instruction ran
  pub fn step(&mut self) -> Result<bool> {
    match self.dispatcher.step()? {
      StepOutcome::Executed(record) => {
        self.trace.record(&record)?;
        Ok(false)
      },
      StepOutcome::Terminated(record) => {
        self.trace.record(&record)?;
        log::info!(
          "terminated at tick {} after {} engine invocations",
          self.dispatcher.tick(),
          self.dispatcher.invocations()
        );
        Ok(true)
      },
    }
  }

  fn summary(&self) -> Result<RunSummary> {
    let terminated = self.dispatcher.state() == DispatchState::Terminated;
    let report = match (&self.initial, terminated) {
      (Some(initial), true) => {
        let golden = reference_image::<E>(&self.engine, initial)?;
        let report = compare_images::<E>(self.dispatcher.image(), &golden, Tolerance::default())?;
        if report.passed() {
          log::info!("golden check passed");
        } else {
          log::warn!("golden check failed:\n{}", report);
        }
        Some(report)
      },
      _ => None,
    };
    Ok(RunSummary {
      ticks: self.dispatcher.tick(),
      executed: self.dispatcher.records().len(),
      invocations: self.dispatcher.invocations(),
      terminated,
      trace_lines: self.trace.lines(),
      report,
    })
  }
}
