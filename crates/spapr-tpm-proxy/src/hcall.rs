/// Hypercall number of `H_TPM_COMM`.
pub const H_TPM_COMM: u64 = 0xEF10;

pub const TPM_COMM_OP_EXECUTE: u64 = 1;
pub const TPM_COMM_OP_CLOSE_SESSION: u64 = 2;

/// Largest command or response buffer the proxy accepts.
pub const TPM_SPAPR_BUFSIZE: u64 = 4096;

pub const H_SUCCESS: i64 = 0;
pub const H_PARAMETER: i64 = -4;
pub const H_RESOURCE: i64 = -16;
pub const H_P2: i64 = -55;
pub const H_P3: i64 = -56;
pub const H_P4: i64 = -57;
pub const H_P5: i64 = -58;

/// Status and first return register of a completed hypercall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HcallReturn {
    pub status: i64,
    pub ret: u64,
}

impl HcallReturn {
    pub const fn success(ret: u64) -> Self {
        Self {
            status: H_SUCCESS,
            ret,
        }
    }

    pub const fn error(status: i64) -> Self {
        Self { status, ret: 0 }
    }
}
