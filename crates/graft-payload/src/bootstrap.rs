//! Composition root for the injected library.
//!
//! Every hook and startup procedure in the payload is registered here,
//! before activation begins; nothing registers later. The registries are
//! then intentionally kept alive for the rest of the process so the
//! captured original-function pointers stay valid.

use std::sync::Mutex;

use graft_core::{
    ActivationEngine, DetourBackend, HookRegistry, LoaderResolver, ShutdownRegistry,
    StartupRegistry,
};
use tracing::{error, info};

use crate::logging;
use crate::observe;

static SHUTDOWN: Mutex<Option<ShutdownRegistry>> = Mutex::new(None);

pub fn run() {
    logging::init();

    info!("graft payload {} attached", env!("CARGO_PKG_VERSION"));

    let mut hooks = HookRegistry::new();
    let mut startup = StartupRegistry::new();
    let mut shutdown = ShutdownRegistry::new();

    if let Err(e) = observe::register(&mut hooks, &mut startup, &mut shutdown) {
        error!("Hook registration failed: {e}");
        return;
    }

    let engine = ActivationEngine::new(LoaderResolver, DetourBackend);
    let activated = engine.activate_all(&mut hooks);

    // Whatever happened, the armed hooks and captured originals must
    // outlive this function; tearing entry bytes back out from under a
    // running host is worse than a stable partially-patched state.
    std::mem::forget(hooks);

    if let Err(e) = activated {
        // The host keeps running, but nothing may rely on the hook set:
        // skip all startup procedures.
        error!("Hook activation aborted: {e}");
        return;
    }

    if let Err(e) = startup.run_all() {
        // Hooks stay installed; they are process infrastructure, not tied
        // to feature success.
        error!("Startup aborted: {e}");
        return;
    }

    info!("graft payload loaded");

    if let Ok(mut slot) = SHUTDOWN.lock() {
        *slot = Some(shutdown);
    }
}

pub fn shutdown() {
    if let Ok(mut slot) = SHUTDOWN.lock()
        && let Some(mut registry) = slot.take()
    {
        registry.run_all();
    }
}
