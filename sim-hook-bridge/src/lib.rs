//! Sim Hook Bridge Library
//!
//! Lets a time-stepped simulation engine call scripted callbacks at fixed
//! points of every step, handing each callback an opaque capsule through which
//! cooperating native functions can read and modify the engine's state.
//!
//! # Architecture
//!
//! - [`Interpreter`] is the embedded script runtime: one per process, created
//!   lazily by [`Interpreter::ensure_initialized`]. It owns the global
//!   namespace, the [`InvocationGate`] and the [`HandleRegistry`].
//! - [`select_hook`] maps a directive token to a [`HookKind`].
//! - [`HookBridge`] binds one hook to one resolved [`CallbackRef`] and is what
//!   the engine calls at each phase.
//! - [`pack_args`] builds the per-call arguments; the [`Capsule`] inside them
//!   expires as soon as the call returns.
//! - [`Simulation`] is a small reference engine that drives bridges and owns
//!   the fatal-error path.
//!
//! Every failure is terminal for the simulation that hit it. There is no
//! retry and no partial-step recovery.
//!
//! # Example Usage
//!
//! ```no_run
//! use sim_hook_bridge::{InterpreterConfig, Simulation, SimulationConfig};
//!
//! let mut sim = Simulation::with_global_interpreter(
//!     &InterpreterConfig::default(),
//!     SimulationConfig::new(),
//! )
//! .unwrap();
//!
//! sim.interpreter()
//!     .exec(r#"fn count(lmp) { increment(lmp, "steps"); }"#)
//!     .unwrap();
//! sim.add_fix_line("counter", "end_of_step count").unwrap();
//!
//! let summary = sim.run(10).unwrap();
//! assert_eq!(summary.counters["steps"], 10);
//! ```

// Public modules
pub mod bridge;
pub mod capsule;
pub mod config;
pub mod engine;
pub mod gate;
pub mod hooks;
pub mod interpreter;
pub mod marshal;
pub mod types;

// Re-export main types for convenience
pub use bridge::{Directive, HookBridge};
pub use capsule::{Capsule, CapsuleError, EngineHandle, HandleRegistry};
pub use config::{InterpreterConfig, SimulationConfig};
pub use engine::{register_api, FixInfo, RunSummary, SimState, Simulation};
pub use gate::InvocationGate;
pub use hooks::{select_hook, HookKind};
pub use interpreter::{CallbackRef, Interpreter, InterpreterBuilder, InterpreterStats, NativeApi};
pub use marshal::{pack_args, InvocationArgs};
pub use types::{BridgeError, Result, Scalar};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
