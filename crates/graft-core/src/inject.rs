//! Remote library injection.
//!
//! A sequential state machine run from the launcher process: start the
//! host, give it a fixed grace period to settle, then write the payload
//! path into its address space and have the host's own loader pull the
//! library in via a remote thread. Every handle and remote allocation is
//! released on every exit path.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Parameters for one injection attempt.
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    /// Host executable to launch.
    pub host_exe: PathBuf,
    /// Payload library the host will be made to load.
    pub payload: PathBuf,
    /// Grace period before probing the host. Best effort only: there is
    /// no reliable cross-process "ready" signal to wait on.
    pub ready_wait: Duration,
}

/// How an injection attempt ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// The remote loader thread reported a nonzero module base.
    Loaded,
    /// The host exited during the readiness wait. Not an error: the host
    /// was closed before injection could start, e.g. the user cancelled a
    /// startup dialog.
    TargetExited,
}

/// Launch the host and inject the payload library into it.
#[cfg(target_os = "windows")]
pub fn inject(config: &InjectorConfig) -> Result<InjectOutcome> {
    imp::run(config)
}

#[cfg(not(target_os = "windows"))]
pub fn inject(_config: &InjectorConfig) -> Result<InjectOutcome> {
    Err(crate::error::Error::LaunchFailed(
        "injection is only supported on Windows".to_string(),
    ))
}

#[cfg(target_os = "windows")]
mod imp {
    use std::ffi::c_void;
    use std::mem::size_of;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use std::thread;

    use tracing::{debug, info};
    use windows::Win32::Foundation::{CloseHandle, HANDLE, STILL_ACTIVE, WAIT_OBJECT_0};
    use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
    };
    use windows::Win32::System::Threading::{
        CreateProcessW, CreateRemoteThread, DETACHED_PROCESS, GetExitCodeThread, INFINITE,
        LPTHREAD_START_ROUTINE, PROCESS_INFORMATION, STARTUPINFOW, WaitForSingleObject,
    };
    use windows::core::{HSTRING, PCSTR, PWSTR};

    use super::{InjectOutcome, InjectorConfig};
    use crate::error::{Error, Result};

    /// Closes the wrapped handle when dropped.
    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            if !self.0.is_invalid() {
                // SAFETY: the handle is owned by this wrapper and closed
                // exactly once.
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
    }

    /// Frees the remote allocation when dropped.
    struct RemoteAlloc {
        process: HANDLE,
        address: *mut c_void,
    }

    impl RemoteAlloc {
        fn new(process: HANDLE, size: usize) -> Result<Self> {
            // SAFETY: plain read/write allocation in the target, freed in
            // Drop.
            let address = unsafe {
                VirtualAllocEx(process, None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
            };
            if address.is_null() {
                return Err(Error::RemoteAllocFailed(
                    windows::core::Error::from_win32().to_string(),
                ));
            }
            Ok(Self { process, address })
        }
    }

    impl Drop for RemoteAlloc {
        fn drop(&mut self) {
            // SAFETY: address came from VirtualAllocEx on the same
            // process.
            unsafe {
                let _ = VirtualFreeEx(self.process, self.address, 0, MEM_RELEASE);
            }
        }
    }

    pub(super) fn run(config: &InjectorConfig) -> Result<InjectOutcome> {
        info!("Launching {}", config.host_exe.display());
        let proc_info = launch(&config.host_exe)?;
        let process = OwnedHandle(proc_info.hProcess);
        let main_thread = OwnedHandle(proc_info.hThread);

        // Best-effort readiness wait; there is no cross-process signal
        // for "the host finished initializing".
        debug!("Waiting {:?} for the host to settle", config.ready_wait);
        thread::sleep(config.ready_wait);

        if !thread_still_active(main_thread.0)? {
            info!("Host exited during the readiness wait; abandoning injection");
            return Ok(InjectOutcome::TargetExited);
        }

        let payload: Vec<u16> = config
            .payload
            .as_os_str()
            .encode_wide()
            .chain(Some(0))
            .collect();
        let payload_bytes = payload.len() * size_of::<u16>();

        let remote = RemoteAlloc::new(process.0, payload_bytes)?;

        let mut written = 0usize;
        // SAFETY: remote.address spans payload_bytes bytes in the target
        // and the local buffer outlives the call.
        unsafe {
            WriteProcessMemory(
                process.0,
                remote.address,
                payload.as_ptr().cast(),
                payload_bytes,
                Some(&mut written),
            )
        }
        .map_err(|_| Error::RemoteWriteFailed {
            expected: payload_bytes,
            written,
        })?;
        if written != payload_bytes {
            return Err(Error::RemoteWriteFailed {
                expected: payload_bytes,
                written,
            });
        }

        let loader = load_library_entry()?;

        debug!("Spawning remote loader thread");
        // SAFETY: the entry point runs inside the target and reads the
        // string written above.
        let thread = unsafe {
            CreateRemoteThread(
                process.0,
                None,
                0,
                loader,
                Some(remote.address as *const c_void),
                0,
                None,
            )
        }
        .map_err(|e| Error::RemoteThreadFailed(e.to_string()))?;
        let thread = OwnedHandle(thread);

        // The remote thread returning is the only completion signal there
        // is; if it never returns the host is wedged and an operator has
        // to intervene, so the wait is unbounded.
        // SAFETY: valid thread handle.
        let wait = unsafe { WaitForSingleObject(thread.0, INFINITE) };
        if wait != WAIT_OBJECT_0 {
            return Err(Error::RemoteThreadFailed(format!(
                "wait ended with {:?}",
                wait
            )));
        }

        let mut exit_code = 0u32;
        // SAFETY: the thread has terminated; its exit code is the
        // LoadLibraryW return value.
        unsafe { GetExitCodeThread(thread.0, &mut exit_code) }
            .map_err(|e| Error::RemoteThreadFailed(e.to_string()))?;

        // The exit code is the loaded module's base address; zero means
        // the target's loader rejected the payload.
        if exit_code == 0 {
            return Err(Error::RemoteLoadFailed);
        }

        info!("Payload loaded into the host");
        Ok(InjectOutcome::Loaded)
    }

    fn launch(host_exe: &Path) -> Result<PROCESS_INFORMATION> {
        // The host resolves its own resources relative to CWD, so the
        // working directory must be its own directory.
        let run_dir = host_exe.parent().ok_or_else(|| {
            Error::LaunchFailed("host executable path has no parent directory".to_string())
        })?;

        let exe = HSTRING::from(host_exe.as_os_str());
        let dir = HSTRING::from(run_dir.as_os_str());

        // CreateProcessW may write into the command line buffer.
        let mut cmdline: Vec<u16> = host_exe.as_os_str().encode_wide().chain(Some(0)).collect();

        let startup = STARTUPINFOW {
            cb: size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        // SAFETY: every pointer stays valid across the call.
        unsafe {
            CreateProcessW(
                &exe,
                Some(PWSTR(cmdline.as_mut_ptr())),
                None,
                None,
                false,
                DETACHED_PROCESS,
                None,
                &dir,
                &startup,
                &mut info,
            )
        }
        .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        Ok(info)
    }

    fn thread_still_active(thread: HANDLE) -> Result<bool> {
        let mut exit_code = 0u32;
        // SAFETY: valid thread handle from CreateProcessW.
        unsafe { GetExitCodeThread(thread, &mut exit_code) }
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;
        Ok(exit_code == STILL_ACTIVE.0 as u32)
    }

    fn load_library_entry() -> Result<LPTHREAD_START_ROUTINE> {
        // kernel32 is mapped at the same base in every process, so the
        // local address of LoadLibraryW is valid inside the target.
        let kernel32 = unsafe { GetModuleHandleW(&HSTRING::from("kernel32.dll")) }
            .map_err(|e| Error::RemoteThreadFailed(e.to_string()))?;
        let address = unsafe { GetProcAddress(kernel32, PCSTR(b"LoadLibraryW\0".as_ptr())) }
            .ok_or_else(|| {
                Error::RemoteThreadFailed("LoadLibraryW not found in kernel32".to_string())
            })?;
        // SAFETY: LoadLibraryW takes one pointer argument and returns a
        // module handle, which matches the thread-start ABI.
        let entry = unsafe {
            std::mem::transmute::<
                unsafe extern "system" fn() -> isize,
                unsafe extern "system" fn(*mut c_void) -> u32,
            >(address)
        };
        Ok(Some(entry))
    }
}
