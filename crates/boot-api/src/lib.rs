//! Accessor service and boot API.
//!
//! The accessor exposes typed read/update primitives over the resource
//! store for the boot-serving process; the HTTP layer answers iPXE boot
//! lookups in Pixiecore API mode (`GET /v1/boot/{mac}`) and serves
//! liveness/metrics probes.

pub mod accessor;
pub mod error;
pub mod http;

pub use accessor::{Accessor, BootArtifacts};
pub use error::AccessorError;
pub use http::{router, serve};
