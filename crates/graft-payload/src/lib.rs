//! # graft-payload
//!
//! The injected library. `DllMain` spawns a bootstrap thread that wires
//! hooks and startup procedures at a single composition root, then hands
//! control back to the host.

#[cfg(target_os = "windows")]
mod bootstrap;
mod logging;
mod observe;

#[cfg(target_os = "windows")]
mod entry {
    use std::ffi::c_void;
    use std::thread;

    use windows::Win32::Foundation::{BOOL, HINSTANCE, TRUE};
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use crate::bootstrap;

    #[unsafe(no_mangle)]
    #[allow(non_snake_case)]
    extern "system" fn DllMain(_module: HINSTANCE, reason: u32, _reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                // The loader lock is held here; all real work happens on a
                // separate thread.
                thread::spawn(bootstrap::run);
            }
            DLL_PROCESS_DETACH => bootstrap::shutdown(),
            _ => {}
        }
        TRUE
    }
}
