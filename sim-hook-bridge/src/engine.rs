//! Reference simulation engine
//!
//! A small time-stepped integrator of tethered particles that drives bridges
//! the way a production engine would: every step runs the first integration
//! half, computes forces, calls `post_force` fixes, runs the second half and
//! calls `end_of_step` fixes. Any bridge failure goes through
//! [`Simulation::fatal`], which halts the run for good.
//!
//! [`register_api`] is the native side of the capsule contract: the functions
//! scripts call to read and modify engine state through the capsule they were
//! handed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rhai::{Engine, EvalAltResult, FLOAT, INT};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bridge::{Directive, HookBridge};
use crate::capsule::{Capsule, EngineHandle, HandleRegistry};
use crate::config::{InterpreterConfig, SimulationConfig};
use crate::hooks::HookKind;
use crate::interpreter::Interpreter;
use crate::types::{BridgeError, Result};

/// Live state of a simulation, reachable from scripts through a capsule
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimState {
    pub step: u64,
    pub time: f64,
    pub dt: f64,
    pub x: Vec<f64>,
    pub v: Vec<f64>,
    pub f: Vec<f64>,
    pub virial: f64,
    /// Named integer counters scripts may keep on the engine
    pub counters: BTreeMap<String, i64>,
    /// Labels appended by scripts, in call order
    pub trace: Vec<String>,
}

impl SimState {
    fn new(config: &SimulationConfig) -> Self {
        let x: Vec<f64> = (0..config.natoms)
            .map(|i| i as f64 * config.initial_spacing)
            .collect();
        Self {
            dt: config.dt,
            v: vec![0.0; x.len()],
            f: vec![0.0; x.len()],
            x,
            ..Default::default()
        }
    }

    fn atom(&self, i: INT) -> std::result::Result<usize, Box<EvalAltResult>> {
        usize::try_from(i)
            .ok()
            .filter(|&i| i < self.x.len())
            .ok_or_else(|| format!("atom index {} out of range (natoms = {})", i, self.x.len()).into())
    }
}

/// State as registered in the handle registry
pub type SharedState = Mutex<SimState>;

fn with_state<R>(
    handles: &HandleRegistry,
    capsule: &Capsule,
    body: impl FnOnce(&mut SimState) -> std::result::Result<R, Box<EvalAltResult>>,
) -> std::result::Result<R, Box<EvalAltResult>> {
    let state = handles
        .open::<SharedState>(capsule)
        .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
    let mut guard = state.lock();
    body(&mut guard)
}

/// Register the engine functions scripts use to work with a capsule
pub fn register_api(engine: &mut Engine, handles: &Arc<HandleRegistry>) {
    let reg = Arc::clone(handles);
    engine.register_fn("step", move |lmp: Capsule| {
        with_state(&reg, &lmp, |s| Ok(s.step as INT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("time", move |lmp: Capsule| {
        with_state(&reg, &lmp, |s| Ok(s.time as FLOAT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("dt", move |lmp: Capsule| {
        with_state(&reg, &lmp, |s| Ok(s.dt as FLOAT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("natoms", move |lmp: Capsule| {
        with_state(&reg, &lmp, |s| Ok(s.x.len() as INT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("virial", move |lmp: Capsule| {
        with_state(&reg, &lmp, |s| Ok(s.virial as FLOAT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("get_x", move |lmp: Capsule, i: INT| {
        with_state(&reg, &lmp, |s| Ok(s.x[s.atom(i)?] as FLOAT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("get_v", move |lmp: Capsule, i: INT| {
        with_state(&reg, &lmp, |s| Ok(s.v[s.atom(i)?] as FLOAT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("get_f", move |lmp: Capsule, i: INT| {
        with_state(&reg, &lmp, |s| Ok(s.f[s.atom(i)?] as FLOAT))
    });

    let reg = Arc::clone(handles);
    engine.register_fn("set_f", move |lmp: Capsule, i: INT, value: FLOAT| {
        with_state(&reg, &lmp, |s| {
            let i = s.atom(i)?;
            s.f[i] = value as f64;
            Ok(())
        })
    });

    let reg = Arc::clone(handles);
    engine.register_fn("add_f", move |lmp: Capsule, i: INT, value: FLOAT| {
        with_state(&reg, &lmp, |s| {
            let i = s.atom(i)?;
            s.f[i] += value as f64;
            Ok(())
        })
    });

    let reg = Arc::clone(handles);
    engine.register_fn("counter", move |lmp: Capsule, name: &str| {
        with_state(&reg, &lmp, |s| {
            Ok(s.counters.get(name).copied().unwrap_or(0) as INT)
        })
    });

    let reg = Arc::clone(handles);
    engine.register_fn("increment", move |lmp: Capsule, name: &str| {
        with_state(&reg, &lmp, |s| {
            let slot = s.counters.entry(name.to_string()).or_insert(0);
            *slot += 1;
            Ok(*slot as INT)
        })
    });

    let reg = Arc::clone(handles);
    engine.register_fn("set_counter", move |lmp: Capsule, name: &str, value: INT| {
        with_state(&reg, &lmp, |s| {
            s.counters.insert(name.to_string(), value as i64);
            Ok(())
        })
    });

    let reg = Arc::clone(handles);
    engine.register_fn("record", move |lmp: Capsule, label: &str| {
        with_state(&reg, &lmp, |s| {
            s.trace.push(label.to_string());
            Ok(())
        })
    });
}

/// A fix as listed by [`Simulation::fixes`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixInfo {
    pub id: String,
    pub hook: HookKind,
    pub callback: String,
}

struct Fix {
    id: String,
    bridge: HookBridge,
}

/// Outcome of [`Simulation::run`]
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub steps_run: u64,
    pub final_step: u64,
    pub final_time: f64,
    pub post_force_calls: u64,
    pub end_of_step_calls: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counters: BTreeMap<String, i64>,
}

/// Time-stepped engine driving hook bridges
pub struct Simulation {
    config: SimulationConfig,
    interpreter: Arc<Interpreter>,
    state: Arc<SharedState>,
    handle: EngineHandle,
    fixes: Vec<Fix>,
    post_force_calls: u64,
    end_of_step_calls: u64,
    halted: Option<String>,
}

impl Simulation {
    /// Create a simulation bound to `interpreter`
    pub fn new(interpreter: Arc<Interpreter>, config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(Mutex::new(SimState::new(&config)));
        let handle = interpreter.handles().register(Arc::clone(&state));

        let sim = Self {
            config,
            interpreter,
            state,
            handle,
            fixes: Vec::new(),
            post_force_calls: 0,
            end_of_step_calls: 0,
            halted: None,
        };
        sim.compute_forces(false);

        log::info!(
            "Simulation created: {} atoms, dt = {}, {}",
            sim.config.natoms,
            sim.config.dt,
            sim.handle
        );
        Ok(sim)
    }

    /// Create a simulation on the process-wide interpreter, initializing it if needed
    pub fn with_global_interpreter(
        interpreter_config: &InterpreterConfig,
        config: SimulationConfig,
    ) -> Result<Self> {
        let interpreter = Interpreter::ensure_initialized(interpreter_config, register_api)?;
        Self::new(interpreter, config)
    }

    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Copy of the current engine state
    pub fn snapshot(&self) -> SimState {
        self.state.lock().clone()
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Diagnostic of the fatal error that halted the run, if any
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Add a fix from a `<hook> <callback>` directive line
    pub fn add_fix_line(&mut self, id: &str, line: &str) -> Result<()> {
        self.ensure_running()?;
        match Directive::parse(line) {
            Ok(directive) => self.add_fix(id, &directive),
            Err(err) => Err(self.fatal(err)),
        }
    }

    /// Bind a callback to a hook under `id`
    ///
    /// A fix with the same id is replaced in place, keeping its position in
    /// the call order.
    pub fn add_fix(&mut self, id: &str, directive: &Directive) -> Result<()> {
        self.ensure_running()?;

        let bridge = match HookBridge::new(Arc::clone(&self.interpreter), self.handle, directive) {
            Ok(bridge) => bridge,
            Err(err) => return Err(self.fatal(err)),
        };

        match self.fixes.iter_mut().find(|fix| fix.id == id) {
            Some(existing) => {
                log::info!("Replacing fix '{}' with '{}'", id, directive);
                existing.bridge = bridge;
            }
            None => {
                log::debug!("Added fix '{}': {}", id, directive);
                self.fixes.push(Fix {
                    id: id.to_string(),
                    bridge,
                });
            }
        }
        Ok(())
    }

    /// Remove a fix, dropping its bridge; returns false if no such fix exists
    pub fn remove_fix(&mut self, id: &str) -> bool {
        let before = self.fixes.len();
        self.fixes.retain(|fix| fix.id != id);
        let removed = self.fixes.len() != before;
        if removed {
            log::debug!("Removed fix '{}'", id);
        }
        removed
    }

    pub fn fixes(&self) -> Vec<FixInfo> {
        self.fixes
            .iter()
            .map(|fix| FixInfo {
                id: fix.id.clone(),
                hook: fix.bridge.hook(),
                callback: fix.bridge.callback().name().to_string(),
            })
            .collect()
    }

    /// Advance one timestep
    pub fn step(&mut self) -> Result<()> {
        self.ensure_running()?;

        let vflag = {
            let mut s = self.state.lock();
            s.step += 1;
            let half_dt = 0.5 * s.dt;
            let dt = s.dt;
            let SimState { x, v, f, .. } = &mut *s;
            for ((x, v), f) in x.iter_mut().zip(v.iter_mut()).zip(f.iter()) {
                *v += half_dt * f;
                *x += dt * *v;
            }
            self.config.vflag_for(s.step)
        };

        self.compute_forces(vflag != 0);
        self.dispatch_phase(HookKind::PostForce, vflag)?;

        {
            let mut s = self.state.lock();
            let half_dt = 0.5 * s.dt;
            let SimState { v, f, .. } = &mut *s;
            for (v, f) in v.iter_mut().zip(f.iter()) {
                *v += half_dt * f;
            }
            s.time += s.dt;
        }

        self.dispatch_phase(HookKind::EndOfStep, vflag)
    }

    /// Run `nsteps` timesteps, stopping at the first fatal error
    pub fn run(&mut self, nsteps: u64) -> Result<RunSummary> {
        self.ensure_running()?;

        let started_at = Utc::now();
        let post_force_before = self.post_force_calls;
        let end_of_step_before = self.end_of_step_calls;
        log::info!("Running {} step(s) with {} fix(es)", nsteps, self.fixes.len());

        for _ in 0..nsteps {
            self.step()?;
        }

        let state = self.state.lock();
        Ok(RunSummary {
            steps_run: nsteps,
            final_step: state.step,
            final_time: state.time,
            post_force_calls: self.post_force_calls - post_force_before,
            end_of_step_calls: self.end_of_step_calls - end_of_step_before,
            started_at,
            finished_at: Utc::now(),
            counters: state.counters.clone(),
        })
    }

    /// Report a fatal error and halt the simulation
    ///
    /// Returns the error so callers can propagate it.
    pub fn fatal(&mut self, err: BridgeError) -> BridgeError {
        log::error!("ERROR: {}", err);
        if self.halted.is_none() {
            self.halted = Some(err.to_string());
        }
        err
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(BridgeError::SimulationHalted(reason.clone())),
            None => Ok(()),
        }
    }

    fn compute_forces(&self, with_virial: bool) {
        let mut s = self.state.lock();
        let k = self.config.spring_constant;
        let SimState { x, f, virial, .. } = &mut *s;
        for (f, x) in f.iter_mut().zip(x.iter()) {
            *f = -k * x;
        }
        *virial = if with_virial {
            x.iter().zip(f.iter()).map(|(x, f)| x * f).sum()
        } else {
            0.0
        };
    }

    fn dispatch_phase(&mut self, phase: HookKind, vflag: i32) -> Result<()> {
        let mut calls = 0;
        let mut failure = None;

        for fix in &self.fixes {
            if fix.bridge.mask() & phase.mask() == 0 {
                continue;
            }
            let outcome = match phase {
                HookKind::PostForce => fix.bridge.on_post_force(vflag),
                HookKind::EndOfStep => fix.bridge.on_end_of_step(),
            };
            match outcome {
                Ok(true) => calls += 1,
                Ok(false) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        match phase {
            HookKind::PostForce => self.post_force_calls += calls,
            HookKind::EndOfStep => self.end_of_step_calls += calls,
        }

        match failure {
            Some(err) => Err(self.fatal(err)),
            None => Ok(()),
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.fixes.clear();
        self.interpreter.handles().release(self.handle);
    }
}
