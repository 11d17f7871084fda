//! Deterministic on-disk layout for boot media artifacts.
//!
//! Per BootMedia, rooted at `<media-root>/<namespace>/<name>`:
//! flat `kernel` and `initrd` without firmware; `kernel`,
//! `no-firmware/initrd`, and `with-firmware/initrd` with firmware.
//! Temporary artifacts live under `tmp/` and verified-digest markers under
//! hidden `.{field}.sha256` files next to the tree.

use std::io;
use std::path::{Path, PathBuf};

/// File name of the kernel artifact.
pub const KERNEL_FILE: &str = "kernel";
/// File name of the initrd artifact.
pub const INITRD_FILE: &str = "initrd";
/// Subdirectory holding the initrd without firmware merged in.
pub const NO_FIRMWARE_DIR: &str = "no-firmware";
/// Subdirectory holding the firmware-merged initrd.
pub const WITH_FIRMWARE_DIR: &str = "with-firmware";
const TMP_DIR: &str = "tmp";

/// Root of the shared boot media tree.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths for one BootMedia object.
    pub fn media_paths(&self, namespace: &str, name: &str) -> MediaPaths {
        MediaPaths {
            dir: self.root.join(namespace).join(name),
        }
    }
}

/// Final and temporary paths for one BootMedia object.
#[derive(Debug, Clone)]
pub struct MediaPaths {
    dir: PathBuf,
}

impl MediaPaths {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/kernel`
    pub fn kernel(&self) -> PathBuf {
        self.dir.join(KERNEL_FILE)
    }

    /// `<dir>/initrd` (flows without firmware)
    pub fn flat_initrd(&self) -> PathBuf {
        self.dir.join(INITRD_FILE)
    }

    /// `<dir>/no-firmware/initrd`
    pub fn no_firmware_initrd(&self) -> PathBuf {
        self.dir.join(NO_FIRMWARE_DIR).join(INITRD_FILE)
    }

    /// `<dir>/with-firmware/initrd`
    pub fn with_firmware_initrd(&self) -> PathBuf {
        self.dir.join(WITH_FIRMWARE_DIR).join(INITRD_FILE)
    }

    /// Scratch space for in-flight downloads and temporary artifacts.
    pub fn tmp_dir(&self) -> PathBuf {
        self.dir.join(TMP_DIR)
    }

    /// Sidecar file recording the verified digest of a final artifact.
    pub fn marker(&self, field: &str) -> PathBuf {
        self.dir.join(format!(".{field}.sha256"))
    }

    /// Creates the directory tree for the selected flow.
    pub async fn ensure_dirs(&self, with_firmware: bool) -> io::Result<()> {
        tokio::fs::create_dir_all(self.tmp_dir()).await?;
        if with_firmware {
            tokio::fs::create_dir_all(self.dir.join(NO_FIRMWARE_DIR)).await?;
            tokio::fs::create_dir_all(self.dir.join(WITH_FIRMWARE_DIR)).await?;
        }
        Ok(())
    }

    /// Removes all temporary artifacts. Errors are ignored; the tmp tree is
    /// recreated on the next pass.
    pub async fn clean_tmp(&self) {
        let _ = tokio::fs::remove_dir_all(self.tmp_dir()).await;
    }
}

/// Path of the kernel as served by the boot-serving process, relative to the
/// media root.
pub fn serve_path_kernel(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}/{KERNEL_FILE}")
}

/// Path of the initrd as served by the boot-serving process, relative to the
/// media root.
///
/// The media's firmware presence decides which initrds exist on disk (flat,
/// or the no-firmware/with-firmware pair); `use_firmware` selects between
/// the pair. Requesting firmware from media that carries none yields `None`.
pub fn serve_path_initrd(
    namespace: &str,
    name: &str,
    media_has_firmware: bool,
    use_firmware: bool,
) -> Option<String> {
    match (media_has_firmware, use_firmware) {
        (false, false) => Some(format!("{namespace}/{name}/{INITRD_FILE}")),
        (false, true) => None,
        (true, true) => Some(format!("{namespace}/{name}/{WITH_FIRMWARE_DIR}/{INITRD_FILE}")),
        (true, false) => Some(format!("{namespace}/{name}/{NO_FIRMWARE_DIR}/{INITRD_FILE}")),
    }
}
