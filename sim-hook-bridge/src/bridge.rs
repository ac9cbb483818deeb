//! Hook bridge
//!
//! Binds one hook to one resolved callback and dispatches it when the engine
//! reaches the matching phase. Construction order is fixed: the directive is
//! checked for shape, then the hook token is selected, and only then is the
//! interpreter asked to resolve the callback.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::capsule::EngineHandle;
use crate::hooks::{select_hook, HookKind};
use crate::interpreter::{CallbackRef, Interpreter};
use crate::marshal::pack_args;
use crate::types::{BridgeError, Result, Scalar};

/// A parsed `<hook> <callback>` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    hook_token: String,
    callback: String,
}

impl Directive {
    pub fn new(hook_token: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            hook_token: hook_token.into(),
            callback: callback.into(),
        }
    }

    /// Build from already split arguments; exactly two are required
    pub fn from_args(args: &[&str]) -> Result<Self> {
        match args {
            [hook, callback] => Ok(Self::new(*hook, *callback)),
            _ => Err(BridgeError::MalformedDirective {
                directive: args.join(" "),
                count: args.len(),
            }),
        }
    }

    /// Parse a whitespace separated directive line
    pub fn parse(line: &str) -> Result<Self> {
        let args: Vec<&str> = line.split_whitespace().collect();
        Self::from_args(&args)
    }

    pub fn hook_token(&self) -> &str {
        &self.hook_token
    }

    pub fn callback(&self) -> &str {
        &self.callback
    }
}

impl FromStr for Directive {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Directive::parse(s)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.hook_token, self.callback)
    }
}

/// One hook bound to one callback for one engine
///
/// Dropping the bridge releases its callback reference.
#[derive(Debug)]
pub struct HookBridge {
    interpreter: Arc<Interpreter>,
    handle: EngineHandle,
    hook: HookKind,
    callback: CallbackRef,
}

impl HookBridge {
    /// Select the hook and resolve the callback named by `directive`
    ///
    /// An unknown hook token fails before the interpreter is consulted.
    pub fn new(
        interpreter: Arc<Interpreter>,
        handle: EngineHandle,
        directive: &Directive,
    ) -> Result<Self> {
        let hook = select_hook(directive.hook_token())?;
        let callback = interpreter.resolve(directive.callback(), hook.arity())?;

        log::info!("Bound callback '{}' to {} for {}", callback.name(), hook, handle);

        Ok(Self {
            interpreter,
            handle,
            hook,
            callback,
        })
    }

    pub fn hook(&self) -> HookKind {
        self.hook
    }

    /// Phase bits this bridge wants to be called for
    pub fn mask(&self) -> u32 {
        self.hook.mask()
    }

    pub fn callback(&self) -> &CallbackRef {
        &self.callback
    }

    /// Post-force entry point; returns whether the callback ran
    pub fn on_post_force(&self, vflag: i32) -> Result<bool> {
        self.dispatch(HookKind::PostForce, &[Scalar::from(vflag)])
    }

    /// End-of-step entry point; returns whether the callback ran
    pub fn on_end_of_step(&self) -> Result<bool> {
        self.dispatch(HookKind::EndOfStep, &[])
    }

    fn dispatch(&self, phase: HookKind, extra: &[Scalar]) -> Result<bool> {
        if phase != self.hook {
            return Ok(false);
        }

        let args = pack_args(self.handle, extra);
        log::trace!("Dispatching {} to '{}' with {} argument(s)", phase, self.callback.name(), args.len());

        self.interpreter
            .invoke(&self.callback, &args)
            .map_err(|message| BridgeError::Invocation {
                callback: self.callback.name().to_string(),
                hook: phase,
                message,
            })?;
        Ok(true)
    }
}
