//! Interpreter and simulation configuration types
//!
//! Both structs deserialize with defaults for every field so a host can load
//! them from a partial config file and refine them with the builder methods.

use serde::{Deserialize, Serialize};

use crate::types::{BridgeError, Result};

/// Settings applied when the embedded interpreter is first initialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Operation budget per script call, 0 = unlimited
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Maximum function call nesting inside scripts
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Reject scripts that reference undefined variables at compile time
    #[serde(default)]
    pub strict_variables: bool,

    /// Source run once, right after initialization
    #[serde(default)]
    pub prelude: Option<String>,
}

fn default_max_operations() -> u64 {
    10_000_000
}

fn default_max_call_levels() -> usize {
    64
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            strict_variables: false,
            prelude: None,
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the per-call operation budget (0 disables it)
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Builder method: set the call nesting limit
    pub fn with_max_call_levels(mut self, levels: usize) -> Self {
        self.max_call_levels = levels;
        self
    }

    /// Builder method: enable strict variable checking
    pub fn with_strict_variables(mut self, enabled: bool) -> Self {
        self.strict_variables = enabled;
        self
    }

    /// Builder method: source to run at initialization
    pub fn with_prelude(mut self, source: impl Into<String>) -> Self {
        self.prelude = Some(source.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_call_levels == 0 {
            return Err(BridgeError::InterpreterInit(
                "max_call_levels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the reference simulation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of tethered particles
    #[serde(default = "default_natoms")]
    pub natoms: usize,

    /// Timestep size
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Tether spring constant
    #[serde(default = "default_spring_constant")]
    pub spring_constant: f64,

    /// Virial flag is raised on steps that are multiples of this, 0 = never
    #[serde(default = "default_virial_every")]
    pub virial_every: u64,

    /// Initial displacement of particle i is `i * initial_spacing`
    #[serde(default = "default_initial_spacing")]
    pub initial_spacing: f64,
}

fn default_natoms() -> usize {
    8
}

fn default_dt() -> f64 {
    0.005
}

fn default_spring_constant() -> f64 {
    1.0
}

fn default_virial_every() -> u64 {
    1
}

fn default_initial_spacing() -> f64 {
    0.1
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            natoms: default_natoms(),
            dt: default_dt(),
            spring_constant: default_spring_constant(),
            virial_every: default_virial_every(),
            initial_spacing: default_initial_spacing(),
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the particle count
    pub fn with_natoms(mut self, natoms: usize) -> Self {
        self.natoms = natoms;
        self
    }

    /// Builder method: set the timestep
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Builder method: set how often the virial flag is raised
    pub fn with_virial_every(mut self, every: u64) -> Self {
        self.virial_every = every;
        self
    }

    /// Builder method: set the tether spring constant
    pub fn with_spring_constant(mut self, k: f64) -> Self {
        self.spring_constant = k;
        self
    }

    /// Virial flag passed to post_force callbacks on `step`
    pub fn vflag_for(&self, step: u64) -> i32 {
        match self.virial_every {
            0 => 0,
            every if step % every == 0 => 1,
            _ => 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(BridgeError::InvalidConfig(format!(
                "dt must be a positive number, got {}",
                self.dt
            )));
        }
        if !self.spring_constant.is_finite() || self.spring_constant < 0.0 {
            return Err(BridgeError::InvalidConfig(format!(
                "spring_constant must be non-negative, got {}",
                self.spring_constant
            )));
        }
        if !self.initial_spacing.is_finite() {
            return Err(BridgeError::InvalidConfig(
                "initial_spacing must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_config_builder() {
        let config = InterpreterConfig::new()
            .with_max_operations(500)
            .with_max_call_levels(8)
            .with_strict_variables(true)
            .with_prelude("let answer = 42;");

        assert_eq!(config.max_operations, 500);
        assert_eq!(config.max_call_levels, 8);
        assert!(config.strict_variables);
        assert_eq!(config.prelude.as_deref(), Some("let answer = 42;"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_call_levels_is_an_init_error() {
        let config = InterpreterConfig::new().with_max_call_levels(0);
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InterpreterInit(_))
        ));
    }

    #[test]
    fn test_vflag_schedule() {
        let config = SimulationConfig::new().with_virial_every(5);
        assert_eq!(config.vflag_for(5), 1);
        assert_eq!(config.vflag_for(6), 0);
        assert_eq!(config.vflag_for(10), 1);

        let never = SimulationConfig::new().with_virial_every(0);
        assert_eq!(never.vflag_for(0), 0);
        assert_eq!(never.vflag_for(7), 0);

        let always = SimulationConfig::new();
        assert_eq!(always.vflag_for(3), 1);
    }

    #[test]
    fn test_simulation_config_validation() {
        assert!(SimulationConfig::new().validate().is_ok());
        assert!(SimulationConfig::new().with_dt(0.0).validate().is_err());
        assert!(SimulationConfig::new().with_dt(f64::NAN).validate().is_err());
        assert!(SimulationConfig::new()
            .with_spring_constant(-1.0)
            .validate()
            .is_err());
    }
}
