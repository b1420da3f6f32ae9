use std::ffi::NulError;
use std::str::Utf8Error;

use thiserror::Error;

/// Everything that can go wrong between building the tables and the kernel
/// refusing the exec.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unsupported pointer width: {width} bytes (expected 4 or 8)")]
    UnsupportedAbi { width: usize },

    #[error("command path contains an interior NUL byte")]
    InvalidCommand(#[source] NulError),

    #[error("argument {index} contains an interior NUL byte")]
    InvalidArgument {
        index: usize,
        #[source]
        source: NulError,
    },

    #[error("invalid environment entry {key:?}: {reason}")]
    InvalidEnvironment { key: String, reason: &'static str },

    #[error("slot {index} out of range (table has {slots} data slots)")]
    SlotOutOfRange { index: usize, slots: usize },

    #[error("environment entry {index} is not valid UTF-8")]
    NotUtf8 {
        index: usize,
        #[source]
        source: Utf8Error,
    },

    /// The kernel rejected the exec. `ret` is the raw syscall return value.
    #[error("execve failed (ret={ret}, errno={errno}): {message}")]
    Syscall {
        ret: isize,
        errno: i32,
        message: String,
    },
}

impl ExecError {
    /// The OS error code, if the kernel produced this error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            ExecError::Syscall { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
