//! Argument marshaling
//!
//! Builds the positional argument list for one callback invocation: a fresh
//! capsule around the engine handle followed by the phase scalars.

use rhai::Dynamic;

use crate::capsule::{Capsule, EngineHandle};
use crate::types::Scalar;

/// Arguments for a single invocation
///
/// Dropping the value expires the capsule, including any copy the script kept.
#[derive(Debug)]
pub struct InvocationArgs {
    capsule: Capsule,
    scalars: Vec<Scalar>,
}

/// Wrap `handle` in a live capsule and append `extra` scalars
pub fn pack_args(handle: EngineHandle, extra: &[Scalar]) -> InvocationArgs {
    InvocationArgs {
        capsule: Capsule::new(handle),
        scalars: extra.to_vec(),
    }
}

impl InvocationArgs {
    pub fn capsule(&self) -> &Capsule {
        &self.capsule
    }

    pub fn scalars(&self) -> &[Scalar] {
        &self.scalars
    }

    /// Number of positional arguments the callback will receive
    pub(crate) fn len(&self) -> usize {
        1 + self.scalars.len()
    }

    /// Positional arguments in interpreter representation
    pub fn to_call_args(&self) -> Vec<Dynamic> {
        let mut args = Vec::with_capacity(self.len());
        args.push(Dynamic::from(self.capsule.clone()));
        args.extend(self.scalars.iter().map(|s| s.to_dynamic()));
        args
    }
}

impl Drop for InvocationArgs {
    fn drop(&mut self) {
        self.capsule.expire();
    }
}
