//! Firmware concatenation.
//!
//! The kernel loads concatenated cpio archives as one initramfs, so the
//! merged artifact is exactly `bytes(no-firmware initrd) ++ bytes(firmware)`.
//! The output is assembled in a temporary file and renamed into place only
//! once both inputs have been written in full.

use crate::error::MediaError;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Builds `dest = base ++ firmware`, byte-exact, returning the output size.
pub async fn concat_initrd(base: &Path, firmware: &Path, dest: &Path) -> Result<u64, MediaError> {
    let staging = dest.with_extension("tmp");
    let mut out = tokio::fs::File::create(&staging).await?;
    let mut total = 0u64;
    for source in [base, firmware] {
        let mut input = tokio::fs::File::open(source).await?;
        total += tokio::io::copy(&mut input, &mut out).await?;
    }
    out.flush().await?;
    drop(out);
    tokio::fs::rename(&staging, dest).await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_is_exact_concatenation() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("initrd");
        let fw = dir.path().join("firmware");
        let dest = dir.path().join("with-firmware-initrd");

        let initrd_bytes = b"initrd payload\x00\x01\x02".to_vec();
        let firmware_bytes = b"\xfffirmware blob".to_vec();
        tokio::fs::write(&base, &initrd_bytes).await.unwrap();
        tokio::fs::write(&fw, &firmware_bytes).await.unwrap();

        let size = concat_initrd(&base, &fw, &dest).await.unwrap();

        let mut expected = initrd_bytes.clone();
        expected.extend_from_slice(&firmware_bytes);
        assert_eq!(size, expected.len() as u64);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), expected);
        // staging file is gone after the rename
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn empty_firmware_yields_base_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("initrd");
        let fw = dir.path().join("firmware");
        let dest = dir.path().join("out");
        tokio::fs::write(&base, b"just the initrd").await.unwrap();
        tokio::fs::write(&fw, b"").await.unwrap();

        concat_initrd(&base, &fw, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"just the initrd");
    }
}
