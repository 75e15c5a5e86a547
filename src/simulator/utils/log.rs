/// Global logging configuration
use env_logger::Env;
use log::LevelFilter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static QUIET: AtomicBool = AtomicBool::new(false);
/// level in force before quiet mode, as a `LevelFilter` discriminant
static SAVED_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Trace as usize);

/// Install the env_logger backend; `RUST_LOG` overrides the default `info` filter.
/// Safe to call more than once.
pub fn init_log() {
  let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
    .format_timestamp(None)
    .format_target(false)
    .is_test(cfg!(test))
    .try_init();
}

fn level_from_usize(level: usize) -> LevelFilter {
  match level {
    0 => LevelFilter::Off,
    1 => LevelFilter::Error,
    2 => LevelFilter::Warn,
    3 => LevelFilter::Info,
    4 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  }
}

/// Quiet mode lowers the global level to warnings; leaving it restores the previous level
pub fn set_quiet(quiet: bool) {
  let was_quiet = QUIET.swap(quiet, Ordering::Relaxed);
  match (was_quiet, quiet) {
    (false, true) => {
      SAVED_LEVEL.store(log::max_level() as usize, Ordering::Relaxed);
      log::set_max_level(log::max_level().min(LevelFilter::Warn));
    },
    (true, false) => log::set_max_level(level_from_usize(SAVED_LEVEL.load(Ordering::Relaxed))),
    _ => {},
  }
}

pub fn is_quiet() -> bool {
  QUIET.load(Ordering::Relaxed)
}
