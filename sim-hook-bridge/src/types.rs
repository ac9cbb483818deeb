//! Core types shared by the bridge
//!
//! Errors, the crate `Result` alias and the scalar values that travel next to
//! the engine capsule when a callback is invoked.

use std::fmt;

use crate::hooks::HookKind;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while binding or invoking scripted callbacks
///
/// Every variant is terminal for the simulation that hit it: the engine routes
/// them through its fatal-error path and stops stepping.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Could not initialize embedded interpreter: {0}")]
    InterpreterInit(String),

    #[error("Could not find callback function '{name}': {reason}")]
    UnresolvedCallback { name: String, reason: String },

    #[error("Unknown hook '{0}' (expected one of: post_force, end_of_step)")]
    UnknownHook(String),

    #[error("Callback '{callback}' failed during {hook}: {message}")]
    Invocation {
        callback: String,
        hook: HookKind,
        message: String,
    },

    #[error("Illegal fix directive '{directive}': expected <hook> <callback>, got {count} argument(s)")]
    MalformedDirective { directive: String, count: usize },

    #[error("Failed to load script {origin}: {message}")]
    ScriptLoad { origin: String, message: String },

    #[error("Invalid simulation configuration: {0}")]
    InvalidConfig(String),

    #[error("Simulation halted after fatal error: {0}")]
    SimulationHalted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for errors raised while configuring a bridge, before any step runs
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BridgeError::UnresolvedCallback { .. }
                | BridgeError::UnknownHook(_)
                | BridgeError::MalformedDirective { .. }
                | BridgeError::InvalidConfig(_)
        )
    }
}

/// A phase-specific scalar passed after the capsule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Convert into the interpreter's native numeric representation
    pub fn to_dynamic(self) -> rhai::Dynamic {
        match self {
            Scalar::Int(v) => rhai::Dynamic::from_int(v as rhai::INT),
            Scalar::Float(v) => rhai::Dynamic::from_float(v as rhai::FLOAT),
        }
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value as i64)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:.3}", v),
        }
    }
}
