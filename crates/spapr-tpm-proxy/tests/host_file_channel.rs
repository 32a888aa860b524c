use std::fs;

use spapr_tpm_proxy::{
    GuestMemory, HcallReturn, TpmProxy, VecGuestMemory, H_RESOURCE, TPM_COMM_OP_CLOSE_SESSION,
    TPM_COMM_OP_EXECUTE,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[test]
fn missing_host_path_reports_resource_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mem = VecGuestMemory::new(0x2000);
    let mut proxy = TpmProxy::new(dir.path().join("tpmrm0"));

    let ret = proxy.h_tpm_comm(&mem, [TPM_COMM_OP_EXECUTE, 0, 10, 0x1000, 0x1000]);
    assert_eq!(ret, HcallReturn::error(H_RESOURCE));
    assert!(!proxy.is_open());
}

#[test]
fn command_reaches_the_host_file_verbatim() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tpm");
    fs::write(&path, b"").unwrap();

    let command = [0x80, 0x01, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x01, 0x44, 0x00, 0x00];
    let mem = VecGuestMemory::new(0x2000);
    mem.write(0x40, &command).unwrap();

    let mut proxy = TpmProxy::new(&path);
    let ret = proxy.h_tpm_comm(
        &mem,
        [TPM_COMM_OP_EXECUTE, 0x40, command.len() as u64, 0x1000, 0x1000],
    );
    // A regular file has nothing to read back after the write.
    assert_eq!(ret, HcallReturn::success(0));
    assert!(proxy.is_open());
    assert_eq!(fs::read(&path).unwrap(), command);

    proxy.h_tpm_comm(&mem, [TPM_COMM_OP_CLOSE_SESSION, 0, 0, 0, 0]);
    assert!(!proxy.is_open());
}
