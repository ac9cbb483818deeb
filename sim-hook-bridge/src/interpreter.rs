//! Embedded interpreter
//!
//! Owns the scripting engine, the global namespace scripts are loaded into,
//! the invocation gate and the engine handle registry. A process normally has
//! exactly one, created on first use by [`Interpreter::ensure_initialized`]
//! and kept until exit; [`Interpreter::builder`] creates independent
//! instances for embedding hosts and tests.

use parking_lot::{Mutex, RwLock};
use rhai::{Dynamic, Engine, FnPtr, Scope, AST};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::capsule::{Capsule, HandleRegistry};
use crate::config::InterpreterConfig;
use crate::gate::InvocationGate;
use crate::marshal::InvocationArgs;
use crate::types::{BridgeError, Result};

/// Registers native functions scripts can call (the cooperating side of a capsule)
pub type NativeApi = fn(&mut Engine, &Arc<HandleRegistry>);

/// The process-wide interpreter, if one has been initialized
static GLOBAL: Mutex<Option<Arc<Interpreter>>> = parking_lot::const_mutex(None);

/// Script functions and global variables accumulated by [`Interpreter::exec`]
struct Namespace {
    functions: Arc<AST>,
    globals: Scope<'static>,
}

/// A resolved scripted callable
///
/// Holds its own reference to the function library it was resolved from, so
/// later script loads that redefine the name do not affect it.
#[derive(Clone)]
pub struct CallbackRef {
    name: String,
    target: FnPtr,
    library: Arc<AST>,
}

impl CallbackRef {
    /// Symbol the callback was resolved from
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRef")
            .field("name", &self.name)
            .field("target", &self.target.fn_name())
            .finish()
    }
}

/// Counters describing interpreter activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterpreterStats {
    pub resolutions: u64,
    pub invocations: u64,
    pub failed_invocations: u64,
    pub gate_acquisitions: u64,
    pub live_handles: usize,
}

/// Builder for interpreter instances
pub struct InterpreterBuilder {
    config: InterpreterConfig,
    apis: Vec<NativeApi>,
}

impl InterpreterBuilder {
    /// Builder method: replace the configuration
    pub fn config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder method: add a native API registration
    pub fn native_api(mut self, api: NativeApi) -> Self {
        self.apis.push(api);
        self
    }

    /// Build the interpreter, running the prelude if one is configured
    pub fn build(self) -> Result<Interpreter> {
        self.config.validate()?;

        let handles = Arc::new(HandleRegistry::new());
        let mut engine = Engine::new();
        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_strict_variables(self.config.strict_variables);
        engine.on_print(|text| log::info!(target: "script", "{}", text));
        engine.on_debug(|text, source, pos| match source {
            Some(source) => log::debug!(target: "script", "{} @ {:?} | {}", source, pos, text),
            None => log::debug!(target: "script", "{:?} | {}", pos, text),
        });

        engine
            .register_type_with_name::<Capsule>("Capsule")
            .register_fn("to_string", |capsule: &mut Capsule| capsule.to_string())
            .register_fn("to_debug", |capsule: &mut Capsule| capsule.to_string())
            .register_fn("is_live", |capsule: &mut Capsule| capsule.is_live());

        for api in &self.apis {
            api(&mut engine, &handles);
        }

        let interpreter = Interpreter {
            engine,
            namespace: RwLock::new(Namespace {
                functions: Arc::new(AST::empty()),
                globals: Scope::new(),
            }),
            gate: InvocationGate::new(),
            handles,
            resolutions: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            failed_invocations: AtomicU64::new(0),
        };

        if let Some(prelude) = &self.config.prelude {
            interpreter
                .exec_named("<prelude>", prelude)
                .map_err(|e| BridgeError::InterpreterInit(format!("prelude failed: {}", e)))?;
        }

        Ok(interpreter)
    }
}

/// Embedded script interpreter shared by every bridge bound to it
pub struct Interpreter {
    engine: Engine,
    namespace: RwLock<Namespace>,
    gate: InvocationGate,
    handles: Arc<HandleRegistry>,
    resolutions: AtomicU64,
    invocations: AtomicU64,
    failed_invocations: AtomicU64,
}

impl Interpreter {
    pub fn builder() -> InterpreterBuilder {
        InterpreterBuilder {
            config: InterpreterConfig::default(),
            apis: Vec::new(),
        }
    }

    /// Return the process-wide interpreter, creating it on first call
    ///
    /// `config` and `api` only take effect on the call that performs the
    /// initialization; every later call returns the same instance unchanged.
    pub fn ensure_initialized(config: &InterpreterConfig, api: NativeApi) -> Result<Arc<Interpreter>> {
        let mut slot = GLOBAL.lock();
        if let Some(existing) = slot.as_ref() {
            log::trace!("Embedded interpreter already initialized");
            return Ok(Arc::clone(existing));
        }

        log::info!("Initializing embedded interpreter");
        let interpreter = Arc::new(
            Interpreter::builder()
                .config(config.clone())
                .native_api(api)
                .build()?,
        );
        *slot = Some(Arc::clone(&interpreter));
        Ok(interpreter)
    }

    /// True once [`ensure_initialized`](Self::ensure_initialized) has succeeded
    pub fn is_initialized() -> bool {
        GLOBAL.lock().is_some()
    }

    pub fn gate(&self) -> &InvocationGate {
        &self.gate
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    /// Compile and run `source` in the global namespace
    ///
    /// Functions accumulate across calls; a later definition replaces an
    /// earlier one with the same name and parameter count. Global variables
    /// persist.
    pub fn exec(&self, source: &str) -> Result<()> {
        self.exec_named("<inline>", source)
    }

    /// Load a script file into the global namespace
    pub fn exec_file(&self, path: &Path) -> Result<()> {
        log::info!("Loading script: {:?}", path);
        let source = fs::read_to_string(path)?;
        self.exec_named(&path.display().to_string(), &source)
    }

    fn exec_named(&self, origin: &str, source: &str) -> Result<()> {
        let load_error = |message: String| BridgeError::ScriptLoad {
            origin: origin.to_string(),
            message,
        };

        self.gate.with_lock(|| {
            // Work on copies so natives called by the script can read the
            // namespace, and a failing script leaves it untouched
            let (functions, mut globals) = {
                let namespace = self.namespace.read_recursive();
                (Arc::clone(&namespace.functions), namespace.globals.clone())
            };

            let compiled = self
                .engine
                .compile_with_scope(&globals, source)
                .map_err(|e| load_error(e.to_string()))?;
            let merged = functions.merge(&compiled);
            self.engine
                .run_ast_with_scope(&mut globals, &merged)
                .map_err(|e| load_error(e.to_string()))?;

            let functions = Arc::new(merged.clone_functions_only());
            log::debug!(
                "Loaded {}: {} function(s), {} global(s) in namespace",
                origin,
                functions.iter_functions().count(),
                globals.len()
            );
            *self.namespace.write() = Namespace { functions, globals };
            Ok(())
        })
    }

    /// Look up `name` in the global namespace for a hook passing `arity` arguments
    ///
    /// Resolves script functions by name and globals holding function
    /// pointers. The target must exist as a script function taking exactly
    /// the hook's arguments (plus any curried ones), so a bad binding fails
    /// here rather than at the first call.
    pub fn resolve(&self, name: &str, arity: usize) -> Result<CallbackRef> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let unresolved = |reason: String| BridgeError::UnresolvedCallback {
            name: name.to_string(),
            reason,
        };

        self.gate.with_lock(|| {
            let namespace = self.namespace.read_recursive();

            let defined = script_arities(&namespace.functions, name);
            if !defined.is_empty() {
                if !defined.contains(&arity) {
                    return Err(unresolved(format!(
                        "defined with {:?} parameter(s), hook passes {}",
                        defined, arity
                    )));
                }
                let target = FnPtr::new(name).map_err(|e| unresolved(e.to_string()))?;
                log::debug!("Resolved callback '{}' to script function", name);
                return Ok(CallbackRef {
                    name: name.to_string(),
                    target,
                    library: Arc::clone(&namespace.functions),
                });
            }

            let value = match namespace.globals.get_value::<Dynamic>(name) {
                Some(value) => value,
                None => return Err(unresolved("not defined in the global namespace".to_string())),
            };
            if !value.is::<FnPtr>() {
                return Err(unresolved(format!(
                    "global holds a value of type {}, which is not callable",
                    value.type_name()
                )));
            }

            let target = value.cast::<FnPtr>();
            let expected = arity + target.curry().len();
            let defined = script_arities(&namespace.functions, target.fn_name());
            if defined.is_empty() {
                return Err(unresolved(format!(
                    "function pointer targets '{}', which is not a script function",
                    target.fn_name()
                )));
            }
            if !defined.contains(&expected) {
                return Err(unresolved(format!(
                    "function pointer target '{}' takes {:?} parameter(s), hook passes {} plus {} curried",
                    target.fn_name(),
                    defined,
                    arity,
                    target.curry().len()
                )));
            }

            log::debug!(
                "Resolved callback '{}' to function pointer '{}'",
                name,
                target.fn_name()
            );
            Ok(CallbackRef {
                name: name.to_string(),
                target,
                library: Arc::clone(&namespace.functions),
            })
        })
    }

    /// Call `callback` with `args` under the gate, discarding its return value
    pub(crate) fn invoke(
        &self,
        callback: &CallbackRef,
        args: &InvocationArgs,
    ) -> std::result::Result<(), String> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let call_args = args.to_call_args();

        let outcome = self.gate.with_lock(|| {
            callback
                .target
                .call::<Dynamic>(&self.engine, &callback.library, call_args)
        });

        outcome.map(|_| ()).map_err(|err| {
            self.failed_invocations.fetch_add(1, Ordering::Relaxed);
            err.to_string()
        })
    }

    /// Read a global variable set by a loaded script
    pub fn global<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<T> {
        self.gate
            .with_lock(|| self.namespace.read_recursive().globals.get_value::<T>(name))
    }

    pub fn stats(&self) -> InterpreterStats {
        InterpreterStats {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            failed_invocations: self.failed_invocations.load(Ordering::Relaxed),
            gate_acquisitions: self.gate.acquisitions(),
            live_handles: self.handles.len(),
        }
    }
}

/// Parameter counts of every script function called `name`
fn script_arities(functions: &AST, name: &str) -> Vec<usize> {
    functions
        .iter_functions()
        .filter(|f| f.name == name)
        .map(|f| f.params.len())
        .collect()
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("gate", &self.gate)
            .field("handles", &self.handles)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::EngineHandle;
    use crate::marshal::pack_args;
    use crate::types::Scalar;

    fn interpreter() -> Interpreter {
        Interpreter::builder().build().unwrap()
    }

    fn dummy_handle(interp: &Interpreter) -> EngineHandle {
        interp.handles().register(Arc::new(()))
    }

    #[test]
    fn test_exec_defines_functions_and_globals() {
        let interp = interpreter();
        interp.exec("let calls = 0; fn on_step(lmp) { 1 }").unwrap();
        assert_eq!(interp.global::<rhai::INT>("calls"), Some(0));
        assert_eq!(interp.resolve("on_step", 1).unwrap().name(), "on_step");
    }

    #[test]
    fn test_later_scripts_see_earlier_functions() {
        let interp = interpreter();
        interp.exec("fn base(x) { x * 2 }").unwrap();
        interp.exec("let doubled = base(21);").unwrap();
        assert_eq!(interp.global::<rhai::INT>("doubled"), Some(42));
    }

    #[test]
    fn test_compile_error_is_script_load_error() {
        let interp = interpreter();
        let err = interp.exec("fn broken( {").unwrap_err();
        assert!(matches!(err, BridgeError::ScriptLoad { .. }));
    }

    #[test]
    fn test_resolve_missing_name() {
        let interp = interpreter();
        match interp.resolve("never_defined", 1) {
            Err(BridgeError::UnresolvedCallback { name, .. }) => assert_eq!(name, "never_defined"),
            other => panic!("expected UnresolvedCallback, got {:?}", other),
        }
        assert_eq!(interp.stats().resolutions, 1);
    }

    #[test]
    fn test_resolve_non_callable_global() {
        let interp = interpreter();
        interp.exec("let threshold = 3.5;").unwrap();
        let err = interp.resolve("threshold", 1).unwrap_err();
        assert!(err.to_string().contains("not callable"), "{}", err);
    }

    #[test]
    fn test_resolve_wrong_arity() {
        let interp = interpreter();
        interp.exec("fn cb(lmp) { }").unwrap();
        assert!(interp.resolve("cb", 1).is_ok());
        assert!(matches!(
            interp.resolve("cb", 2),
            Err(BridgeError::UnresolvedCallback { .. })
        ));
    }

    #[test]
    fn test_resolve_closure_global() {
        let interp = interpreter();
        interp.exec("let cb = |lmp, vflag| vflag * 10;").unwrap();
        let callback = interp.resolve("cb", 2).unwrap();
        let handle = dummy_handle(&interp);
        let args = pack_args(handle, &[Scalar::Int(1)]);
        assert!(interp.invoke(&callback, &args).is_ok());
    }

    #[test]
    fn test_resolve_rejects_dangling_function_pointer() {
        let interp = interpreter();
        interp.exec(r#"let cb = Fn("never_defined");"#).unwrap();
        match interp.resolve("cb", 1) {
            Err(BridgeError::UnresolvedCallback { name, reason }) => {
                assert_eq!(name, "cb");
                assert!(reason.contains("never_defined"), "{}", reason);
            }
            other => panic!("expected UnresolvedCallback, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_checks_closure_arity() {
        let interp = interpreter();
        interp.exec("let short = |a| 1;").unwrap();
        assert!(interp.resolve("short", 1).is_ok());
        assert!(matches!(
            interp.resolve("short", 2),
            Err(BridgeError::UnresolvedCallback { .. })
        ));
    }

    #[test]
    fn test_resolve_counts_curried_arguments() {
        let interp = interpreter();
        interp
            .exec(
                r#"
                fn scaled(k, lmp) { k }
                let named = Fn("scaled").curry(5);
                let seen = [];
                let capturing = |lmp, vflag| seen.push(vflag);
                "#,
            )
            .unwrap();
        assert!(interp.resolve("named", 1).is_ok());
        assert!(interp.resolve("named", 2).is_err());
        assert!(interp.resolve("capturing", 2).is_ok());
        assert!(interp.resolve("capturing", 1).is_err());
    }

    #[test]
    fn test_failed_script_leaves_namespace_unchanged() {
        let interp = interpreter();
        interp.exec("let kept = 1; fn old_fn(lmp) { }").unwrap();

        let err = interp
            .exec(r#"let partial = 2; fn new_fn(lmp) { } throw "halfway";"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ScriptLoad { .. }));

        assert_eq!(interp.global::<rhai::INT>("kept"), Some(1));
        assert_eq!(interp.global::<rhai::INT>("partial"), None);
        assert!(interp.resolve("old_fn", 1).is_ok());
        assert!(interp.resolve("new_fn", 1).is_err());
    }

    static REENTRANT: std::sync::OnceLock<Arc<Interpreter>> = std::sync::OnceLock::new();

    fn reentrant_api(engine: &mut Engine, _handles: &Arc<HandleRegistry>) {
        engine.register_fn("peek", |name: &str| -> rhai::INT {
            REENTRANT
                .get()
                .and_then(|interp| interp.global::<rhai::INT>(name))
                .unwrap_or(-1)
        });
        engine.register_fn("can_resolve", |name: &str| -> bool {
            REENTRANT
                .get()
                .map(|interp| interp.resolve(name, 1).is_ok())
                .unwrap_or(false)
        });
    }

    #[test]
    fn test_natives_reenter_interpreter_during_exec() {
        let interp = Arc::new(
            Interpreter::builder()
                .native_api(reentrant_api)
                .build()
                .unwrap(),
        );
        assert!(REENTRANT.set(Arc::clone(&interp)).is_ok());
        interp.exec("let x = 1; fn cb(lmp) { }").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&interp);
        std::thread::spawn(move || {
            let result = worker.exec("let x = 2; let seen = peek(\"x\"); let found = can_resolve(\"cb\");");
            let _ = tx.send(result.is_ok());
        });

        let finished = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("exec re-entering the interpreter did not finish");
        assert!(finished);
        // Natives see the namespace as committed before this script ran
        assert_eq!(interp.global::<rhai::INT>("seen"), Some(1));
        assert_eq!(interp.global::<bool>("found"), Some(true));
        assert_eq!(interp.global::<rhai::INT>("x"), Some(2));
        assert!(!interp.gate().is_locked());
    }

    #[test]
    fn test_resolved_callback_survives_redefinition() {
        let interp = interpreter();
        interp.exec(r#"fn cb(lmp) { throw "old"; }"#).unwrap();
        let old = interp.resolve("cb", 1).unwrap();
        interp.exec("fn cb(lmp) { }").unwrap();
        let new = interp.resolve("cb", 1).unwrap();

        let handle = dummy_handle(&interp);
        let args = pack_args(handle, &[]);
        assert!(interp.invoke(&old, &args).unwrap_err().contains("old"));
        assert!(interp.invoke(&new, &args).is_ok());
    }

    #[test]
    fn test_invoke_passes_capsule_and_scalars() {
        let interp = interpreter();
        interp
            .exec(
                r#"
                fn check(lmp, vflag) {
                    if type_of(lmp) != "Capsule" { throw "first argument is " + type_of(lmp); }
                    if vflag != 1 { throw "vflag was " + vflag; }
                }
                "#,
            )
            .unwrap();
        let callback = interp.resolve("check", 2).unwrap();
        let handle = dummy_handle(&interp);
        let args = pack_args(handle, &[Scalar::Int(1)]);
        interp.invoke(&callback, &args).unwrap();

        let stats = interp.stats();
        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.failed_invocations, 0);
    }

    #[test]
    fn test_invoke_releases_gate_on_script_error() {
        let interp = interpreter();
        interp.exec(r#"fn cb(lmp) { throw "boom"; }"#).unwrap();
        let callback = interp.resolve("cb", 1).unwrap();
        let handle = dummy_handle(&interp);
        let args = pack_args(handle, &[]);

        let message = interp.invoke(&callback, &args).unwrap_err();
        assert!(message.contains("boom"));
        assert!(!interp.gate().is_locked());
        assert_eq!(interp.stats().failed_invocations, 1);
    }

    #[test]
    fn test_operation_budget_stops_runaway_callback() {
        let interp = Interpreter::builder()
            .config(InterpreterConfig::new().with_max_operations(1_000))
            .build()
            .unwrap();
        interp.exec("fn spin(lmp) { loop { } }").unwrap();
        let callback = interp.resolve("spin", 1).unwrap();
        let handle = dummy_handle(&interp);
        let args = pack_args(handle, &[]);
        assert!(interp.invoke(&callback, &args).is_err());
    }

    #[test]
    fn test_prelude_runs_at_build() {
        let interp = Interpreter::builder()
            .config(InterpreterConfig::new().with_prelude("let units = \"lj\";"))
            .build()
            .unwrap();
        assert_eq!(interp.global::<String>("units").as_deref(), Some("lj"));
    }

    #[test]
    fn test_failing_prelude_is_init_error() {
        let result = Interpreter::builder()
            .config(InterpreterConfig::new().with_prelude("throw \"no runtime\";"))
            .build();
        assert!(matches!(result, Err(BridgeError::InterpreterInit(_))));
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let first =
            Interpreter::ensure_initialized(&InterpreterConfig::default(), crate::engine::register_api)
                .unwrap();
        let second = Interpreter::ensure_initialized(
            &InterpreterConfig::new().with_max_operations(1),
            crate::engine::register_api,
        )
        .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Interpreter::is_initialized());
    }
}
