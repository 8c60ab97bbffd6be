//! Module resolution in the current process.

use crate::error::{Error, Result};

/// Read-only snapshot of a loaded module's image location, taken from the
/// OS loader's record on demand.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub base: usize,
    pub size: usize,
}

impl ModuleInfo {
    /// Look up an already-loaded module by name.
    ///
    /// A module that is not loaded is a fatal condition for anything that
    /// needs a search region, so there is no retry or wait here.
    #[cfg(target_os = "windows")]
    pub fn query(name: &str) -> Result<Self> {
        use windows::Win32::System::LibraryLoader::GetModuleHandleW;
        use windows::Win32::System::ProcessStatus::{K32GetModuleInformation, MODULEINFO};
        use windows::Win32::System::Threading::GetCurrentProcess;
        use windows::core::HSTRING;

        // SAFETY: GetModuleHandleW does not take ownership of the handle.
        let handle = unsafe { GetModuleHandleW(&HSTRING::from(name)) }
            .map_err(|_| Error::ModuleNotFound(name.to_string()))?;

        let mut info = MODULEINFO::default();
        // SAFETY: handle refers to a module loaded in the current process
        // and info is sized for the call.
        let ok = unsafe {
            K32GetModuleInformation(
                GetCurrentProcess(),
                handle,
                &mut info,
                std::mem::size_of::<MODULEINFO>() as u32,
            )
        };
        if !ok.as_bool() {
            return Err(Error::ModuleNotFound(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            base: info.lpBaseOfDll as usize,
            size: info.SizeOfImage as usize,
        })
    }

    #[cfg(not(target_os = "windows"))]
    pub fn query(name: &str) -> Result<Self> {
        Err(Error::ModuleNotFound(name.to_string()))
    }
}

/// Seam between the activation engine and the OS loader.
pub trait ModuleResolver {
    fn resolve(&self, name: &str) -> Result<ModuleInfo>;
}

/// Resolves modules through the current process's loader records.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoaderResolver;

impl ModuleResolver for LoaderResolver {
    fn resolve(&self, name: &str) -> Result<ModuleInfo> {
        ModuleInfo::query(name)
    }
}
