use std::cell::RefCell;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("guest memory access out of bounds: gpa=0x{gpa:x}, len=0x{len:x}")]
pub struct GuestMemoryError {
    pub gpa: u64,
    pub len: usize,
}

/// Guest physical memory as seen by the hypercall handler.
pub trait GuestMemory {
    fn read(&self, gpa: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError>;
    fn write(&self, gpa: u64, src: &[u8]) -> Result<(), GuestMemoryError>;
}

/// Contiguous guest RAM starting at physical address zero.
#[derive(Debug, Clone)]
pub struct VecGuestMemory {
    mem: RefCell<Vec<u8>>,
}

impl VecGuestMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: RefCell::new(vec![0u8; size_bytes]),
        }
    }

    fn range(&self, gpa: u64, len: usize) -> Result<std::ops::Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { gpa, len };
        let start = usize::try_from(gpa).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or_else(|| err.clone())?;
        if end > self.mem.borrow().len() {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl GuestMemory for VecGuestMemory {
    fn read(&self, gpa: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let range = self.range(gpa, dst.len())?;
        dst.copy_from_slice(&self.mem.borrow()[range]);
        Ok(())
    }

    fn write(&self, gpa: u64, src: &[u8]) -> Result<(), GuestMemoryError> {
        let range = self.range(gpa, src.len())?;
        self.mem.borrow_mut()[range].copy_from_slice(src);
        Ok(())
    }
}
