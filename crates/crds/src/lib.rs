//! BootForge CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the BootForge controllers.

pub mod boot_media;
pub mod boot_target;
pub mod machine;
pub mod provision;
pub mod references;
pub mod response_template;
pub mod validation;

pub use boot_media::*;
pub use boot_target::*;
pub use machine::*;
pub use provision::*;
pub use references::*;
pub use response_template::*;
pub use validation::*;

/// API group shared by all BootForge CRDs.
pub const API_GROUP: &str = "bootforge.io";
