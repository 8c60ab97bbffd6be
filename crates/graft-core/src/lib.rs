//! # graft-core
//!
//! Core library for the graft retrofit toolkit.
//!
//! This crate provides:
//! - Byte signature parsing and linear signature scanning
//! - Module resolution in the current process
//! - Inline hook registration, activation, and trampoline capture
//! - Startup/shutdown procedure registries
//! - Remote library injection for the launcher process
//!
//! The hook and startup registries are populated explicitly from a single
//! composition root before activation begins, then stay read-only for the
//! rest of the process's life.

pub mod error;
pub mod hook;
pub mod inject;
pub mod module;
pub mod pattern;
pub mod scan;
pub mod sigset;
pub mod startup;
pub mod walker;

pub use error::{Error, Result};
pub use hook::{
    ActivationEngine, ArmedHook, HookBackend, HookDescriptor, HookRegistry, TargetSpec,
};
#[cfg(target_os = "windows")]
pub use hook::DetourBackend;
pub use inject::{InjectOutcome, InjectorConfig, inject};
pub use module::{LoaderResolver, ModuleInfo, ModuleResolver};
pub use pattern::{BytePattern, PatternByte};
pub use scan::{find, find_in_module};
pub use sigset::{SignatureEntry, SignatureSet, load_signatures, save_signatures};
pub use startup::{ShutdownRegistry, StartupProcedure, StartupRegistry};
pub use walker::StructWalker;
