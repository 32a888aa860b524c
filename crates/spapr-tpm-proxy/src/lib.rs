//! sPAPR `H_TPM_COMM` hypercall proxy.
//!
//! The proxy forwards opaque TPM command buffers from guest memory to a host-side character
//! device (typically a TPM resource manager node) and copies the response back. It never
//! interprets the buffers.

#![forbid(unsafe_code)]

mod channel;
mod error;
mod hcall;
mod memory;
mod proxy;

pub use channel::{ChannelOpener, FileOpener, HostChannel};
pub use error::TpmProxyError;
pub use hcall::{
    HcallReturn, H_P2, H_P3, H_P4, H_P5, H_PARAMETER, H_RESOURCE, H_SUCCESS, H_TPM_COMM,
    TPM_COMM_OP_CLOSE_SESSION, TPM_COMM_OP_EXECUTE, TPM_SPAPR_BUFSIZE,
};
pub use memory::{GuestMemory, GuestMemoryError, VecGuestMemory};
pub use proxy::TpmProxy;
