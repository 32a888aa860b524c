use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::hcall::{H_P2, H_P4, H_RESOURCE};
use crate::memory::GuestMemoryError;

#[derive(Debug, Error)]
pub enum TpmProxyError {
    #[error("failed to open TPM host channel {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TPM host channel I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("short write to TPM host channel ({written} of {len} bytes)")]
    ShortWrite { written: usize, len: usize },

    #[error("failed to read TPM command from guest: {0}")]
    CommandBuffer(GuestMemoryError),

    #[error("failed to write TPM response to guest: {0}")]
    ResponseBuffer(GuestMemoryError),
}

impl TpmProxyError {
    /// Hypercall status reported to the guest for this failure.
    pub fn hcall_status(&self) -> i64 {
        match self {
            Self::Open { .. } | Self::Io(_) | Self::ShortWrite { .. } => H_RESOURCE,
            Self::CommandBuffer(_) => H_P2,
            Self::ResponseBuffer(_) => H_P4,
        }
    }
}
