use crate::config::{EngineConfig, GemmSection, ImageSection, SpmvSection, TranspSection};
use crate::error::{GemxError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Defaults shipped with the binary
const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Prefix of environment overrides, e.g. `GEMX__SPMV__LANES=8`
const ENV_PREFIX: &str = "GEMX";

/// Simulation section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  /// one JSON object per executed instruction; empty disables tracing
  #[serde(default)]
  pub trace_file: String,
  /// check the final image against the reference model
  #[serde(default)]
  pub golden: bool,
}

/// Unified application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub image: ImageSection,
  #[serde(default)]
  pub gemm: GemmSection,
  #[serde(default)]
  pub spmv: SpmvSection,
  #[serde(default)]
  pub transp: TranspSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

impl AppConfig {
  /// Engine parameters without the simulation section
  pub fn engine(&self) -> EngineConfig {
    EngineConfig {
      image: self.image.clone(),
      gemm: self.gemm.clone(),
      spmv: self.spmv.clone(),
      transp: self.transp.clone(),
    }
  }
}

/// Load the embedded default.toml
pub fn load_default_config() -> Result<AppConfig> {
  toml::from_str::<AppConfig>(DEFAULT_CONFIG).map_err(|e| GemxError::config(format!("failed to parse default config: {}", e)))
}

/// Defaults, then the optional user file, then environment variables
pub fn load_layered(custom_config_path: Option<&Path>) -> Result<AppConfig> {
  let mut builder = ::config::Config::builder().add_source(::config::File::from_str(DEFAULT_CONFIG, ::config::FileFormat::Toml));
  if let Some(path) = custom_config_path {
    if !path.exists() {
      return Err(GemxError::config(format!("config file {} not found", path.display())));
    }
    builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Toml));
  }
  builder = builder.add_source(
    ::config::Environment::with_prefix(ENV_PREFIX)
      .separator("__")
      .try_parsing(true),
  );
  builder
    .build()
    .and_then(|layered| layered.try_deserialize::<AppConfig>())
    .map_err(|e| GemxError::config(e.to_string()))
}

/// Apply CLI parameters over the loaded configuration
pub fn apply_cli_overrides(config: &mut AppConfig, quiet: bool, step: bool, trace_file: Option<&str>, golden: bool) {
  if quiet {
    config.simulation.quiet = true;
  }
  if step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = trace_file {
    config.simulation.trace_file = file.to_string();
  }
  if golden {
    config.simulation.golden = true;
  }
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
  config.engine().validate()?;
  if config.simulation.step_mode && config.simulation.quiet {
    log::warn!("quiet step mode hides the per-instruction log");
  }
  Ok(())
}

/// Load and merge configuration
///
/// Flow:
/// 1. Load the embedded defaults
/// 2. Layer the custom file and `GEMX__*` environment variables over them
/// 3. Apply CLI overrides
/// 4. Validate
pub fn load_and_merge_configs(
  custom_config_path: Option<&Path>,
  quiet: bool,
  step: bool,
  trace_file: Option<&str>,
  golden: bool,
) -> Result<AppConfig> {
  let mut config = load_layered(custom_config_path)?;
  apply_cli_overrides(&mut config, quiet, step, trace_file, golden);
  validate_config(&config)?;
  Ok(config)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ElementKind;
  use std::fs;
  use std::sync::Mutex;

  // environment variables are process-wide
  static ENV_MUTEX: Mutex<()> = Mutex::new(());

  #[test]
  fn test_default_matches_engine_default() {
    let config = load_default_config().unwrap();
    let engine = config.engine();
    let builtin = EngineConfig::new();
    assert_eq!(engine.image.page_size, builtin.image.page_size);
    assert_eq!(engine.spmv.c_block_rows, builtin.spmv.c_block_rows);
    assert_eq!(engine.transp.blocks, builtin.transp.blocks);
    assert_eq!(engine.image.element, ElementKind::I32);
    assert!(!config.simulation.golden);
  }

  #[test]
  fn test_file_environment_and_cli_layering() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let path = std::env::temp_dir().join(format!("gemx-config-{}.toml", std::process::id()));
    fs::write(&path, "[spmv]\nlanes = 2\nc_block_rows = 64\n\n[simulation]\ntrace_file = \"file.jsonl\"\n").unwrap();
    std::env::set_var("GEMX__TRANSP__M_GROUPS", "2");

    let config = load_and_merge_configs(Some(&path), true, false, Some("cli.jsonl"), false);
    std::env::remove_var("GEMX__TRANSP__M_GROUPS");
    let _ = fs::remove_file(&path);

    let config = config.unwrap();
    assert_eq!(config.spmv.lanes, 2);
    assert_eq!(config.spmv.mac_groups, 2);
    assert_eq!(config.transp.m_groups, 2);
    assert_eq!(config.simulation.trace_file, "cli.jsonl");
    assert!(config.simulation.quiet);
  }

  #[test]
  fn test_invalid_geometry_rejected() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let path = std::env::temp_dir().join(format!("gemx-bad-config-{}.toml", std::process::id()));
    fs::write(&path, "[spmv]\nc_block_rows = 100\n").unwrap();
    let result = load_and_merge_configs(Some(&path), false, false, None, false);
    let _ = fs::remove_file(&path);
    assert!(matches!(result, Err(GemxError::Config { .. })));
  }

  #[test]
  fn test_missing_file() {
    let missing = Path::new("/nonexistent/gemx.toml");
    assert!(load_and_merge_configs(Some(missing), false, false, None, false).is_err());
  }
}
