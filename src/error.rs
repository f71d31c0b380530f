//! Error types for tethered camera operations.

use thiserror::Error;

/// Primary error type for camera acquisition.
#[derive(Error, Debug)]
pub enum TetherError {
    // Device errors
    #[error("No camera detected")]
    CameraNotDetected,

    #[error("Failed to launch '{program}': {reason}")]
    CommandSpawn { program: String, reason: String },

    #[error("Camera command '{operation}' failed (exit code {code:?}): {output}")]
    CommandFailed {
        operation: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Camera command '{operation}' timed out after {timeout_ms}ms")]
    CommandTimeout { operation: String, timeout_ms: u64 },

    // Discovery errors
    #[error("Photo folder not found: no {level} entry matched")]
    FolderNotFound { level: &'static str },

    // Transfer errors
    #[error("Download of '{file}' failed: {reason}")]
    Transfer { file: String, reason: String },

    #[error("Camera storage is full: {0}")]
    StorageFull(String),

    #[error("Timed out waiting for '{path}' to be written")]
    FileNotReady { path: String },

    // Configuration errors
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // Web server errors
    #[error("Web server failed to start on {addr}: {reason}")]
    WebServerFailed { addr: String, reason: String },

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TetherError {
    /// Returns true if the error is recoverable by the user.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CameraNotDetected
                | Self::CommandSpawn { .. }
                | Self::FolderNotFound { .. }
                | Self::StorageFull(_)
                | Self::ConfigNotFound { .. }
                | Self::ConfigInvalid(_)
        )
    }

    /// Returns true if the camera reported that it ran out of space.
    pub const fn is_storage_full(&self) -> bool {
        matches!(self, Self::StorageFull(_))
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CameraNotDetected => {
                Some("Ensure the camera is connected via USB, switched on and not mounted by another program")
            }
            Self::CommandSpawn { .. } => Some("Install gphoto2 or point --gphoto2 at the binary"),
            Self::FolderNotFound { .. } => Some("Insert a memory card or take one photo to create the DCIM folder"),
            Self::StorageFull(_) => Some("Free up space on the camera memory card"),
            Self::ConfigNotFound { .. } => Some("Run: tether config --path"),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using TetherError.
pub type Result<T> = std::result::Result<T, TetherError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| TetherError::Other(format!("{}: {e}", f().into())))
    }
}
