//! Startup and shutdown procedure registries.
//!
//! Startup procedures are the single place feature initialization happens
//! once hooks are active, e.g. resolving additional internal function
//! pointers a feature needs. Registration order is execution order.

use tracing::info;

use crate::error::{Error, Result};

/// A named, fallible initialization step.
pub struct StartupProcedure {
    pub name: &'static str,
    run: Box<dyn FnMut() -> bool>,
}

impl StartupProcedure {
    pub fn new(name: &'static str, run: impl FnMut() -> bool + 'static) -> Self {
        Self {
            name,
            run: Box::new(run),
        }
    }
}

/// Ordered list of startup procedures, run once after hook activation.
#[derive(Default)]
pub struct StartupRegistry {
    procedures: Vec<StartupProcedure>,
}

impl StartupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, procedure: StartupProcedure) {
        self.procedures.push(procedure);
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Run every procedure in registration order. The first failure stops
    /// the sequence and surfaces the failing procedure's name; procedures
    /// already run stay run, and already-activated hooks are unaffected.
    pub fn run_all(&mut self) -> Result<()> {
        if self.procedures.is_empty() {
            return Ok(());
        }

        info!("Running {} startup procedures", self.procedures.len());

        for procedure in &mut self.procedures {
            if !(procedure.run)() {
                return Err(Error::StartupProcedureFailed(procedure.name.to_string()));
            }
            info!("Startup procedure \"{}\" passed", procedure.name);
        }

        Ok(())
    }
}

/// Teardown callbacks run once when the payload library unloads.
#[derive(Default)]
pub struct ShutdownRegistry {
    functions: Vec<fn()>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: fn()) {
        self.functions.push(function);
    }

    pub fn run_all(&mut self) {
        for function in self.functions.drain(..) {
            function();
        }
    }
}
