use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::channel::{ChannelOpener, FileOpener, HostChannel};
use crate::error::TpmProxyError;
use crate::hcall::{
    HcallReturn, H_P3, H_P5, H_PARAMETER, TPM_COMM_OP_CLOSE_SESSION, TPM_COMM_OP_EXECUTE,
    TPM_SPAPR_BUFSIZE,
};
use crate::memory::GuestMemory;

/// Pass-through proxy between the guest and a host TPM channel.
pub struct TpmProxy<O: ChannelOpener = FileOpener> {
    host_path: PathBuf,
    opener: O,
    channel: Option<O::Channel>,
}

impl TpmProxy<FileOpener> {
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self::with_opener(host_path, FileOpener)
    }
}

impl<O: ChannelOpener> TpmProxy<O> {
    pub fn with_opener(host_path: impl Into<PathBuf>, opener: O) -> Self {
        Self {
            host_path: host_path.into(),
            opener,
            channel: None,
        }
    }

    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Handles `H_TPM_COMM`. `args` are the hypercall parameters
    /// `[op, data_in, data_in_size, data_out, data_out_size]`.
    pub fn h_tpm_comm(&mut self, mem: &dyn GuestMemory, args: [u64; 5]) -> HcallReturn {
        let [op, data_in, data_in_size, data_out, data_out_size] = args;
        match op {
            TPM_COMM_OP_EXECUTE => {
                if data_in_size > TPM_SPAPR_BUFSIZE {
                    warn!(data_in_size, "TPM command buffer too large");
                    return HcallReturn::error(H_P3);
                }
                if data_out_size > TPM_SPAPR_BUFSIZE {
                    warn!(data_out_size, "TPM response buffer too large");
                    return HcallReturn::error(H_P5);
                }
                // Both sizes are bounded by TPM_SPAPR_BUFSIZE above.
                let sizes = (data_in_size as usize, data_out_size as usize);
                match self.execute(mem, data_in, sizes.0, data_out, sizes.1) {
                    Ok(len) => HcallReturn::success(len as u64),
                    Err(err) => {
                        warn!(error = %err, "TPM_COMM execute failed");
                        HcallReturn::error(err.hcall_status())
                    }
                }
            }
            TPM_COMM_OP_CLOSE_SESSION => {
                self.close_session();
                HcallReturn::success(0)
            }
            _ => {
                debug!(op, "unknown TPM_COMM operation");
                HcallReturn::error(H_PARAMETER)
            }
        }
    }

    /// Drops the host channel; the next EXECUTE reopens it.
    pub fn close_session(&mut self) {
        if self.channel.take().is_some() {
            debug!(path = %self.host_path.display(), "closed TPM host channel");
        }
    }

    fn execute(
        &mut self,
        mem: &dyn GuestMemory,
        data_in: u64,
        data_in_size: usize,
        data_out: u64,
        data_out_size: usize,
    ) -> Result<usize, TpmProxyError> {
        let mut request = vec![0u8; data_in_size];
        mem.read(data_in, &mut request)
            .map_err(TpmProxyError::CommandBuffer)?;

        let channel = self.channel()?;
        let mut response = vec![0u8; data_out_size];
        let len = match channel.transact(&request, &mut response) {
            Ok(len) => len,
            Err(err) => {
                // A failed channel is reopened on the next command.
                self.channel = None;
                return Err(err);
            }
        };

        mem.write(data_out, &response[..len])
            .map_err(TpmProxyError::ResponseBuffer)?;
        debug!(request_len = data_in_size, response_len = len, "forwarded TPM command");
        Ok(len)
    }

    fn channel(&mut self) -> Result<&mut O::Channel, TpmProxyError> {
        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => {
                let channel =
                    self.opener
                        .open(&self.host_path)
                        .map_err(|source| TpmProxyError::Open {
                            path: self.host_path.clone(),
                            source,
                        })?;
                debug!(path = %self.host_path.display(), "opened TPM host channel");
                channel
            }
        };
        Ok(self.channel.insert(channel))
    }
}
