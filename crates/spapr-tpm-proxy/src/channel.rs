use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::TpmProxyError;

/// Bidirectional host-side TPM channel.
pub trait HostChannel {
    /// Sends `request` and reads one response into `response`, returning its length.
    fn transact(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, TpmProxyError>;
}

/// Opens the host channel on first use.
pub trait ChannelOpener {
    type Channel: HostChannel;

    fn open(&mut self, path: &Path) -> io::Result<Self::Channel>;
}

/// Opens the host path read-write as a plain file or character device.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOpener;

impl ChannelOpener for FileOpener {
    type Channel = File;

    fn open(&mut self, path: &Path) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }
}

impl HostChannel for File {
    fn transact(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, TpmProxyError> {
        // The resource manager expects each command in a single write.
        let written = self.write(request)?;
        if written != request.len() {
            return Err(TpmProxyError::ShortWrite {
                written,
                len: request.len(),
            });
        }
        Ok(self.read(response)?)
    }
}
