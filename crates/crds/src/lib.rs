//! auto-mtls resource definitions
//!
//! Typed views of the cert-manager resources the controller creates, plus the
//! annotation vocabulary and well-known object names shared by every reconciler.

pub mod annotations;
pub mod certificate;
pub mod cluster_issuer;
pub mod names;

pub use annotations::*;
pub use certificate::*;
pub use cluster_issuer::*;
pub use names::*;
