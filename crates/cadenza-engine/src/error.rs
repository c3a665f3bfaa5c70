use std::path::PathBuf;

use thiserror::Error;

/// Mismatch between a module's declarations and the session data it is loaded
/// against. Always fatal to the load; nothing is built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no curve line named `{0}`")]
    MissingLine(String),
    #[error("no widget named `{0}`")]
    MissingWidget(String),
    #[error("no sampler info for `{0}`")]
    MissingSamplerInfo(String),
    #[error("no sound input for `{0}`")]
    MissingSoundInput(String),
    #[error("curve line `{0}` records but has no automation path")]
    MissingAutomationPath(String),
    #[error("unknown effect `{0}`")]
    UnknownEffect(String),
    #[error("`{0}` does not name a modulation signal")]
    UnknownSignal(String),
    #[error("widget `{name}` is invalid: {reason}")]
    InvalidWidget { name: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidWidget {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Problems reading or writing sound and automation files.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: symphonia::core::errors::Error,
    },
    #[error("{path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("{0}: no supported audio track")]
    Unsupported(PathBuf),
}

impl FileError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            FileError::Io { path, .. }
            | FileError::Decode { path, .. }
            | FileError::Encode { path, .. }
            | FileError::Unsupported(path) => path,
        }
    }
}

/// Lifecycle states of [`crate::AudioEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Booted,
    Running,
    Stopped,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("audio device error: {0}")]
    Device(String),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("invalid parameter access: {0}")]
    RuntimeParameter(String),
    #[error("cannot {action} while {state:?}")]
    State {
        state: EngineState,
        action: &'static str,
    },
}

impl EngineError {
    pub fn device(message: impl Into<String>) -> Self {
        EngineError::Device(message.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
