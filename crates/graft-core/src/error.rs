use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Pattern for \"{name}\" not matched in {module}")]
    PatternNotMatched { name: String, module: String },

    #[error("Failed to install hook \"{name}\": {message}")]
    HookInstallFailed { name: String, message: String },

    #[error("Failed to enable hook \"{name}\": {message}")]
    HookEnableFailed { name: String, message: String },

    #[error("Startup procedure \"{0}\" failed")]
    StartupProcedureFailed(String),

    #[error("Failed to launch target process: {0}")]
    LaunchFailed(String),

    #[error("Failed to allocate memory in target process: {0}")]
    RemoteAllocFailed(String),

    #[error("Short write into target process: wrote {written} of {expected} bytes")]
    RemoteWriteFailed { expected: usize, written: usize },

    #[error("Remote thread failed in target process: {0}")]
    RemoteThreadFailed(String),

    #[error("Target process could not load the payload library")]
    RemoteLoadFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
