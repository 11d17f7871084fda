//! The readiness resolver.
//!
//! A pure function over the current snapshot of the dependency chain
//! Machine → BootTarget → BootMedia, short-circuiting at the first blocking
//! resource. NotFound is a permanent condition (the Provision fails);
//! NotComplete is transient (the Provision waits).

use crds::boot_media::MediaPhase;
use crds::{BootMedia, BootTarget, Machine};
use resource_store::ObjectKind;

/// Why a resource blocks the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Dangling reference; permanent until the spec changes
    NotFound,
    /// The resource exists but is not yet Complete; transient
    NotComplete,
}

/// Verdict of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Blocked {
        resource: ObjectKind,
        name: String,
        reason: BlockReason,
    },
}

/// Resolves the chain in fixed order: Machine, then BootTarget, then
/// BootMedia.
pub fn resolve(
    machine: Option<&Machine>,
    machine_name: &str,
    target: Option<&BootTarget>,
    target_name: &str,
    media: Option<&BootMedia>,
    media_name: &str,
) -> Readiness {
    if machine.is_none() {
        return Readiness::Blocked {
            resource: ObjectKind::Machine,
            name: machine_name.to_string(),
            reason: BlockReason::NotFound,
        };
    }
    if target.is_none() {
        return Readiness::Blocked {
            resource: ObjectKind::BootTarget,
            name: target_name.to_string(),
            reason: BlockReason::NotFound,
        };
    }
    match media {
        None => Readiness::Blocked {
            resource: ObjectKind::BootMedia,
            name: media_name.to_string(),
            reason: BlockReason::NotFound,
        },
        Some(media) => {
            let phase = media.status.as_ref().map(|s| s.phase).unwrap_or_default();
            if phase == MediaPhase::Complete {
                Readiness::Ready
            } else {
                Readiness::Blocked {
                    resource: ObjectKind::BootMedia,
                    name: media_name.to_string(),
                    reason: BlockReason::NotComplete,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::boot_media::{BootMediaSpec, BootMediaStatus, MediaChecksums};
    use crds::{BootTargetSpec, MachineSpec, ResourceReference};

    fn machine() -> Machine {
        Machine::new(
            "m0",
            MachineSpec {
                mac_address: "52:54:00:12:34:56".to_string(),
                machine_id: "0123456789abcdef0123456789abcdef".to_string(),
                hostname: None,
            },
        )
    }

    fn target() -> BootTarget {
        BootTarget::new(
            "t0",
            BootTargetSpec {
                template_ref: ResourceReference::bootforge("ResponseTemplate", "tpl"),
                boot_media_ref: ResourceReference::bootforge("BootMedia", "media"),
                use_firmware: false,
            },
        )
    }

    fn media(phase: MediaPhase) -> BootMedia {
        let mut media = BootMedia::new(
            "media",
            BootMediaSpec {
                kernel_url: Some("http://repo/vmlinuz".to_string()),
                initrd_url: Some("http://repo/initrd".to_string()),
                iso_url: None,
                iso_kernel_path: None,
                iso_initrd_path: None,
                firmware_url: None,
                checksums: MediaChecksums::default(),
            },
        );
        media.status = Some(BootMediaStatus {
            phase,
            ..BootMediaStatus::default()
        });
        media
    }

    #[test]
    fn missing_machine_blocks_first() {
        let verdict = resolve(None, "m0", None, "t0", None, "media");
        assert_eq!(
            verdict,
            Readiness::Blocked {
                resource: ObjectKind::Machine,
                name: "m0".to_string(),
                reason: BlockReason::NotFound,
            }
        );
    }

    #[test]
    fn missing_target_blocks_before_media() {
        let m = machine();
        let verdict = resolve(Some(&m), "m0", None, "t0", None, "media");
        assert_eq!(
            verdict,
            Readiness::Blocked {
                resource: ObjectKind::BootTarget,
                name: "t0".to_string(),
                reason: BlockReason::NotFound,
            }
        );
    }

    #[test]
    fn incomplete_media_is_transient() {
        let m = machine();
        let t = target();
        let media = media(MediaPhase::Downloading);
        let verdict = resolve(Some(&m), "m0", Some(&t), "t0", Some(&media), "media");
        assert_eq!(
            verdict,
            Readiness::Blocked {
                resource: ObjectKind::BootMedia,
                name: "media".to_string(),
                reason: BlockReason::NotComplete,
            }
        );
    }

    #[test]
    fn complete_chain_is_ready() {
        let m = machine();
        let t = target();
        let media = media(MediaPhase::Complete);
        let verdict = resolve(Some(&m), "m0", Some(&t), "t0", Some(&media), "media");
        assert_eq!(verdict, Readiness::Ready);
    }

    #[test]
    fn media_without_status_is_not_complete() {
        let m = machine();
        let t = target();
        let mut media = media(MediaPhase::Complete);
        media.status = None;
        let verdict = resolve(Some(&m), "m0", Some(&t), "t0", Some(&media), "media");
        assert!(matches!(
            verdict,
            Readiness::Blocked {
                reason: BlockReason::NotComplete,
                ..
            }
        ));
    }
}
