//! Hook selection
//!
//! The set of simulation phases a callback can bind to is closed. Adding one
//! means adding a variant here, a row in [`HOOK_TABLE`] and a call site in the
//! engine's step loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{BridgeError, Result};

/// A point in the per-timestep loop where a callback may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    /// After forces are computed, before the second integration half-step
    PostForce,
    /// After integration, once the step is complete
    EndOfStep,
}

/// Token -> hook lookup table
const HOOK_TABLE: &[(&str, HookKind)] = &[
    ("post_force", HookKind::PostForce),
    ("end_of_step", HookKind::EndOfStep),
];

/// Map a directive token to its hook
pub fn select_hook(token: &str) -> Result<HookKind> {
    HOOK_TABLE
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, hook)| *hook)
        .ok_or_else(|| BridgeError::UnknownHook(token.to_string()))
}

impl HookKind {
    /// All hooks, in step-loop order
    pub const ALL: [HookKind; 2] = [HookKind::PostForce, HookKind::EndOfStep];

    /// Directive token for this hook
    pub fn token(self) -> &'static str {
        match self {
            HookKind::PostForce => "post_force",
            HookKind::EndOfStep => "end_of_step",
        }
    }

    /// Phase bit the engine tests before calling a fix
    pub fn mask(self) -> u32 {
        match self {
            HookKind::PostForce => 1 << 0,
            HookKind::EndOfStep => 1 << 1,
        }
    }

    /// Number of positional arguments the callback receives (capsule included)
    pub fn arity(self) -> usize {
        match self {
            HookKind::PostForce => 2,
            HookKind::EndOfStep => 1,
        }
    }
}

impl FromStr for HookKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        select_hook(s)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
