//! Configuration file management for plugforge.
//!
//! Provides a TOML-based config file at `~/.config/plugforge/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use plugforge_core::exec::CommandSpec;
use plugforge_core::pipeline::PipelineConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

/// On-disk config. Every field is optional; missing values fall through
/// to the built-in defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub scaffold: ScaffoldSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GeneratorSection {
    /// Generator program, e.g. "claude".
    pub command: Option<String>,
    /// Fixed flags passed on every invocation.
    pub args: Option<Vec<String>>,
    pub max_turns: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScaffoldSection {
    /// Template program, e.g. "elizaos".
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LimitsSection {
    pub build_cap: Option<u32>,
    pub test_cap: Option<u32>,
    pub revision_cap: Option<u32>,
    pub gate_timeout_secs: Option<u64>,
    pub required_disk_mib: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the plugforge config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/plugforge` or
/// `~/.config/plugforge`, regardless of platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("plugforge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("plugforge")
}

/// Return the path to the plugforge config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file if it exists; a missing file is just defaults.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// CLI-level overrides collected from flags.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub generator: Option<String>,
    pub generation_timeout_secs: Option<u64>,
    pub build_cap: Option<u32>,
    pub test_cap: Option<u32>,
    pub revision_cap: Option<u32>,
    pub output_dir: Option<PathBuf>,
}

/// Resolve the effective pipeline config from overrides, environment,
/// and the config file.
pub fn resolve(overrides: &Overrides) -> Result<PipelineConfig> {
    let file = load_config()?;
    let mut config = PipelineConfig::default();

    if let Some(program) = overrides
        .generator
        .clone()
        .or_else(|| std::env::var("PLUGFORGE_GENERATOR").ok())
        .or(file.generator.command)
    {
        config.generator_command.program = program;
    }
    if let Some(args) = file.generator.args {
        config.generator_command.args = args;
    }
    if let Some(max_turns) = file.generator.max_turns {
        config.max_turns = max_turns;
    }
    if let Some(secs) = overrides
        .generation_timeout_secs
        .or(file.generator.timeout_secs)
    {
        config.generation_timeout = Duration::from_secs(secs);
    }

    if let Some(program) = file.scaffold.command {
        let args = file.scaffold.args.unwrap_or_default();
        config.template_command = CommandSpec {
            program,
            args,
        };
    }
    if let Some(secs) = file.scaffold.timeout_secs {
        config.template_timeout = Duration::from_secs(secs);
    }

    if let Some(cap) = overrides.build_cap.or(file.limits.build_cap) {
        config.build_cap = cap;
    }
    if let Some(cap) = overrides.test_cap.or(file.limits.test_cap) {
        config.test_cap = cap;
    }
    if let Some(cap) = overrides.revision_cap.or(file.limits.revision_cap) {
        config.revision_cap = cap;
    }
    if let Some(secs) = file.limits.gate_timeout_secs {
        config.gate_timeout = Duration::from_secs(secs);
    }
    if let Some(mib) = file.limits.required_disk_mib {
        config.required_disk_bytes = mib.saturating_mul(1024 * 1024);
    }

    if let Some(dir) = &overrides.output_dir {
        config.output_dir = dir.clone();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_parses_to_defaults() {
        let file: ConfigFile = toml::from_str("").unwrap();
        assert!(file.generator.command.is_none());
        assert!(file.limits.build_cap.is_none());
    }

    #[test]
    fn partial_file_parses() {
        let file: ConfigFile = toml::from_str(
            r#"
            [generator]
            command = "claude"
            max_turns = 50

            [limits]
            build_cap = 8
            "#,
        )
        .unwrap();
        assert_eq!(file.generator.command.as_deref(), Some("claude"));
        assert_eq!(file.generator.max_turns, Some(50));
        assert_eq!(file.limits.build_cap, Some(8));
        assert!(file.scaffold.command.is_none());
    }

    #[test]
    fn config_file_round_trips() {
        let file = ConfigFile {
            generator: GeneratorSection {
                command: Some("claude".to_owned()),
                args: Some(vec!["-p".to_owned()]),
                max_turns: Some(40),
                timeout_secs: Some(900),
            },
            ..ConfigFile::default()
        };
        let text = toml::to_string_pretty(&file).unwrap();
        let parsed: ConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(parsed.generator.command.as_deref(), Some("claude"));
        assert_eq!(parsed.generator.timeout_secs, Some(900));
    }
}
