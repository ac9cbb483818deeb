//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sim_hook_bridge::{select_hook, InterpreterConfig, SimulationConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Script files loaded into the interpreter before any fix is added
    #[serde(default)]
    pub scripts: Vec<PathBuf>,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub fixes: Vec<FixConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default = "default_steps")]
    pub steps: u64,
    #[serde(default)]
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
}

fn default_steps() -> u64 {
    100
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            format: OutputFormat::default(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// One `fix python`-style binding: `id`, hook token and callback name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FixConfig {
    pub id: String,
    pub hook: String,
    pub callback: String,
}

impl FixConfig {
    /// Parse `ID=HOOK CALLBACK` as given on the command line
    pub fn parse_arg(arg: &str) -> Result<Self> {
        let (id, directive) = match arg.split_once('=') {
            Some(parts) => parts,
            None => bail!("expected ID=HOOK CALLBACK, got '{}'", arg),
        };
        let id = id.trim();
        if id.is_empty() {
            bail!("fix id is empty in '{}'", arg);
        }

        let words: Vec<&str> = directive.split_whitespace().collect();
        match words.as_slice() {
            [hook, callback] => Ok(Self {
                id: id.to_string(),
                hook: hook.to_string(),
                callback: callback.to_string(),
            }),
            _ => bail!(
                "fix '{}' needs exactly a hook and a callback, got {} argument(s)",
                id,
                words.len()
            ),
        }
    }
}

impl AppConfig {
    /// Resolve relative script paths against the directory holding the config file
    fn resolve_paths(&mut self, base: &Path) {
        for script in &mut self.scripts {
            if script.is_relative() {
                *script = base.join(&*script);
            }
        }
        if let Some(output) = &mut self.run.output {
            if output.is_relative() {
                *output = base.join(&*output);
            }
        }
    }

    /// Check what can be checked before the interpreter starts
    pub fn validate(&self) -> Result<()> {
        self.simulation
            .validate()
            .context("Invalid [simulation] section")?;

        for fix in &self.fixes {
            select_hook(&fix.hook).with_context(|| format!("Invalid fix '{}'", fix.id))?;
        }

        for script in &self.scripts {
            if !script.is_file() {
                bail!("Script file not found: {:?}", script);
            }
        }

        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }

    Ok(config)
}
