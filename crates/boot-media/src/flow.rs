//! Flow classification for BootMedia specs.
//!
//! Exactly one of four flows is selected from the populated fields. Each
//! variant is a pure data description; the orchestrator consumes it with one
//! generic execution routine instead of scattering presence checks.

use crate::error::MediaError;
use crds::boot_media::{
    BootMediaSpec, FIELD_FIRMWARE, FIELD_FIRMWARE_INITRD, FIELD_INITRD, FIELD_ISO, FIELD_KERNEL,
};

/// One downloadable source with its optional declared digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceField {
    pub name: &'static str,
    pub url: String,
    pub checksum: Option<String>,
}

/// Extraction targets inside an ISO image. The checksums apply to the
/// extracted bytes, not the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoExtraction {
    pub kernel_path: String,
    pub initrd_path: String,
    pub kernel_checksum: Option<String>,
    pub initrd_checksum: Option<String>,
}

/// The four download flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFlow {
    /// kernel + initrd into the flat directory
    Direct {
        kernel: SourceField,
        initrd: SourceField,
    },
    /// kernel flat; initrd under no-firmware; firmware concatenated into
    /// with-firmware
    DirectWithFirmware {
        kernel: SourceField,
        initrd: SourceField,
        firmware: SourceField,
    },
    /// ISO downloaded to a temporary location; kernel/initrd extracted flat
    Iso {
        iso: SourceField,
        extract: IsoExtraction,
    },
    /// as Iso, with the extracted initrd treated as the no-firmware initrd
    IsoWithFirmware {
        iso: SourceField,
        extract: IsoExtraction,
        firmware: SourceField,
    },
}

impl MediaFlow {
    /// Whether this flow produces the with-firmware initrd.
    pub fn uses_firmware(&self) -> bool {
        matches!(self, Self::DirectWithFirmware { .. } | Self::IsoWithFirmware { .. })
    }

    /// The tracked fields this flow declares, including the concatenation
    /// field when firmware is used.
    pub fn declared_fields(&self) -> Vec<&'static str> {
        match self {
            Self::Direct { .. } => vec![FIELD_KERNEL, FIELD_INITRD],
            Self::DirectWithFirmware { .. } => {
                vec![FIELD_KERNEL, FIELD_INITRD, FIELD_FIRMWARE, FIELD_FIRMWARE_INITRD]
            }
            Self::Iso { .. } => vec![FIELD_ISO, FIELD_KERNEL, FIELD_INITRD],
            Self::IsoWithFirmware { .. } => vec![
                FIELD_ISO,
                FIELD_KERNEL,
                FIELD_INITRD,
                FIELD_FIRMWARE,
                FIELD_FIRMWARE_INITRD,
            ],
        }
    }
}

/// Selects the flow for a BootMedia spec from its populated fields.
pub fn classify(spec: &BootMediaSpec) -> Result<MediaFlow, MediaError> {
    if let Some(iso_url) = &spec.iso_url {
        if spec.kernel_url.is_some() || spec.initrd_url.is_some() {
            return Err(MediaError::InvalidSpec(
                "isoUrl cannot be combined with kernelUrl/initrdUrl".to_string(),
            ));
        }
        let kernel_path = spec.iso_kernel_path.clone().ok_or_else(|| {
            MediaError::InvalidSpec("isoUrl requires isoKernelPath".to_string())
        })?;
        let initrd_path = spec.iso_initrd_path.clone().ok_or_else(|| {
            MediaError::InvalidSpec("isoUrl requires isoInitrdPath".to_string())
        })?;

        let iso = SourceField {
            name: FIELD_ISO,
            url: iso_url.clone(),
            checksum: spec.checksums.iso.clone(),
        };
        let extract = IsoExtraction {
            kernel_path,
            initrd_path,
            kernel_checksum: spec.checksums.kernel.clone(),
            initrd_checksum: spec.checksums.initrd.clone(),
        };
        return Ok(match firmware_field(spec) {
            Some(firmware) => MediaFlow::IsoWithFirmware { iso, extract, firmware },
            None => MediaFlow::Iso { iso, extract },
        });
    }

    if spec.iso_kernel_path.is_some() || spec.iso_initrd_path.is_some() {
        return Err(MediaError::InvalidSpec(
            "ISO extraction paths require isoUrl".to_string(),
        ));
    }

    let kernel_url = spec
        .kernel_url
        .clone()
        .ok_or_else(|| MediaError::InvalidSpec("kernelUrl is required".to_string()))?;
    let initrd_url = spec
        .initrd_url
        .clone()
        .ok_or_else(|| MediaError::InvalidSpec("initrdUrl is required".to_string()))?;

    let kernel = SourceField {
        name: FIELD_KERNEL,
        url: kernel_url,
        checksum: spec.checksums.kernel.clone(),
    };
    let initrd = SourceField {
        name: FIELD_INITRD,
        url: initrd_url,
        checksum: spec.checksums.initrd.clone(),
    };
    Ok(match firmware_field(spec) {
        Some(firmware) => MediaFlow::DirectWithFirmware { kernel, initrd, firmware },
        None => MediaFlow::Direct { kernel, initrd },
    })
}

fn firmware_field(spec: &BootMediaSpec) -> Option<SourceField> {
    spec.firmware_url.as_ref().map(|url| SourceField {
        name: FIELD_FIRMWARE,
        url: url.clone(),
        checksum: spec.checksums.firmware.clone(),
    })
}
