//! Manifest handling: bundle codec, cluster-safe naming, and template
//! substitution. Everything here is pure and synchronous.

pub mod codec;
pub mod naming;
pub mod template;

pub use codec::{GroupVersionKind, ParsedDocument};
