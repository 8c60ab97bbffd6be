//! Host map-document observer.
//!
//! The smallest real collaborator of the hook core: one inline hook whose
//! replacement forwards through the captured original, a startup
//! procedure that resolves an extra internal function by signature, and
//! offset-based reads from the opaque objects the host passes around.

use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use graft_core::{
    BytePattern, HookDescriptor, HookRegistry, ModuleInfo, Result, ShutdownRegistry,
    SignatureEntry, SignatureSet, StartupProcedure, StartupRegistry, StructWalker, TargetSpec,
    load_signatures,
};
use tracing::{debug, info, warn};

/// The host module every target of this feature lives in.
const HOST_MODULE: &str = "hammer_dll.dll";

/// Host build the builtin signatures were derived against.
const SIGNATURE_VERSION: &str = "2017-05";

/// Optional override next to the host executable, so signatures can be
/// refreshed for a new host build without rebuilding the payload.
const SIGNATURE_FILE: &str = "graft_signatures.json";

/// Entry of the host's per-solid load callback, May 2017 host build.
const SOLID_LOAD_CODE: &[u8] = b"\x55\x8B\xEC\x53\x56\x57\x8B\x7D\x0C\x0F\xBF\xB7\x00\x00\x00\x00\x8D\x8F\x00\x00\x00\x00\x8D\x46\x01\x50\xE8\x00\x00\x00\x00";
const SOLID_LOAD_MASK: &str = "xxxxxxxxxxxx????xx????xxxxx????";

mod layout {
    //! Field offsets inside the host's opaque solid object, valid for the
    //! May 2017 host build.
    pub const SOLID_ID: usize = 164;
    pub const SOLID_FACE_COUNT: usize = 556;
}

type SolidLoadFn = extern "C" fn(*mut c_void, *mut c_void) -> i32;
type SignalUpdateFn = extern "C" fn(i32);

static SOLID_LOAD_ORIGINAL: OnceLock<SolidLoadFn> = OnceLock::new();
static SIGNAL_UPDATE: OnceLock<SignalUpdateFn> = OnceLock::new();
static SOLIDS_SEEN: AtomicU64 = AtomicU64::new(0);

/// Wire this feature into the composition root's registries.
pub fn register(
    hooks: &mut HookRegistry,
    startup: &mut StartupRegistry,
    shutdown: &mut ShutdownRegistry,
) -> Result<()> {
    let pattern = BytePattern::from_code_and_mask(SOLID_LOAD_CODE, SOLID_LOAD_MASK)?;

    hooks.register(
        HookDescriptor::new(
            "MapSolidLoadSide",
            HOST_MODULE,
            TargetSpec::Signature(pattern),
            solid_load_hook as SolidLoadFn as *const (),
        )
        .with_save_original(store_solid_load_original),
    );

    startup.register(StartupProcedure::new("ObserveInit", init));
    shutdown.register(close);

    Ok(())
}

/// Entry the host uses to broadcast document changes. Available to
/// feature code only after startup has run.
pub fn signal_update() -> Option<SignalUpdateFn> {
    SIGNAL_UPDATE.get().copied()
}

extern "C" fn solid_load_hook(file: *mut c_void, solid: *mut c_void) -> i32 {
    if !solid.is_null() {
        SOLIDS_SEEN.fetch_add(1, Ordering::Relaxed);

        let walker = StructWalker::new(solid as *const u8);
        // SAFETY: the host hands us a live solid object; the offsets are
        // inside it for the signed host build.
        let id: i32 = unsafe { walker.read_at(layout::SOLID_ID) };
        let face_count: i16 = unsafe { walker.read_at(layout::SOLID_FACE_COUNT) };
        debug!("Loading solid {id} with {face_count} faces");
    }

    match SOLID_LOAD_ORIGINAL.get() {
        Some(original) => original(file, solid),
        // Unreachable in practice: the hook is enabled only after the
        // original pointer has been stored.
        None => 0,
    }
}

fn store_solid_load_original(original: *const ()) {
    // SAFETY: the trampoline preserves the hooked function's signature.
    let original = unsafe { std::mem::transmute::<*const (), SolidLoadFn>(original) };
    let _ = SOLID_LOAD_ORIGINAL.set(original);
}

/// Resolve the host's update-notification entry. Runs after hooks are
/// active, as the one place this feature does lookup work of its own.
fn init() -> bool {
    let signatures = signature_set();

    let Some(entry) = signatures.entry("SignalUpdate") else {
        warn!(
            "Signature set {} has no SignalUpdate entry",
            signatures.version
        );
        return false;
    };

    let pattern = match entry.pattern() {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("SignalUpdate signature unusable: {e}");
            return false;
        }
    };

    let module = match ModuleInfo::query(HOST_MODULE) {
        Ok(module) => module,
        Err(e) => {
            warn!("{e}");
            return false;
        }
    };

    // SAFETY: the loader snapshot covers the mapped image.
    let address = match unsafe { graft_core::find_in_module(&module, "SignalUpdate", &pattern) } {
        Ok(address) => address,
        Err(e) => {
            warn!("{e}");
            return false;
        }
    };

    // SAFETY: the signature identifies the host's notification entry,
    // which takes a single event code.
    let function = unsafe { std::mem::transmute::<*const (), SignalUpdateFn>(address as *const ()) };
    let _ = SIGNAL_UPDATE.set(function);

    info!("Resolved \"SignalUpdate\" -> {HOST_MODULE} @ {address:#x}");
    true
}

fn close() {
    info!(
        "Observer detached after {} solids",
        SOLIDS_SEEN.load(Ordering::Relaxed)
    );
}

fn builtin_signatures() -> SignatureSet {
    SignatureSet {
        version: SIGNATURE_VERSION.to_string(),
        entries: vec![SignatureEntry {
            name: "SignalUpdate".to_string(),
            module: HOST_MODULE.to_string(),
            pattern: "55 8B EC 56 8B 75 08 FF 15 ?? ?? ?? ?? FF 04 B5 ?? ?? ?? ?? D9 1C B5 ?? ?? ?? ?? 5E 5D C3"
                .to_string(),
        }],
    }
}

fn signature_set() -> SignatureSet {
    match load_signatures(SIGNATURE_FILE) {
        Ok(set) => {
            info!("Loaded signature override {SIGNATURE_FILE} ({})", set.version);
            set
        }
        Err(e) => {
            debug!("No signature override: {e}");
            builtin_signatures()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_load_pattern_parses() {
        let pattern = BytePattern::from_code_and_mask(SOLID_LOAD_CODE, SOLID_LOAD_MASK).unwrap();
        assert_eq!(pattern.len(), 31);
        assert!(!pattern.bytes()[0].wildcard);
        assert!(pattern.bytes()[12].wildcard);
    }

    #[test]
    fn builtin_signatures_parse() {
        let set = builtin_signatures();
        assert_eq!(set.version, SIGNATURE_VERSION);
        for entry in &set.entries {
            entry.pattern().unwrap();
        }
    }

    #[test]
    fn solid_load_pattern_matches_its_own_prologue() {
        let pattern = BytePattern::from_code_and_mask(SOLID_LOAD_CODE, SOLID_LOAD_MASK).unwrap();
        // The concrete bytes of the signed prologue, with arbitrary values
        // in the wildcard positions.
        let mut image = SOLID_LOAD_CODE.to_vec();
        for (byte, mask) in image.iter_mut().zip(SOLID_LOAD_MASK.chars()) {
            if mask != 'x' {
                *byte = 0x7F;
            }
        }
        assert_eq!(graft_core::find(&image, &pattern), Some(0));
    }
}
