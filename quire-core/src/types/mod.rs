//! Domain types for Quire.
//!
//! - [`RenderOptions`]: Everything that describes one render request
//! - [`Fingerprint`]: Content hash identifying logically identical requests

mod fingerprint;
mod options;

pub use fingerprint::*;
pub use options::*;
