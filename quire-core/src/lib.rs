//! # Quire Core
//!
//! Core types, errors, and traits for the Quire rendering service.
//!
//! This crate provides the building blocks used by all other Quire crates:
//!
//! - **Types**: Render options and request fingerprints
//! - **Errors**: The shared error hierarchy
//! - **Constants**: Cache, coalescing, and rendering defaults
//! - **Traits**: The [`Renderer`] seam for rendering engines
//!
//! ## Example
//!
//! ```rust
//! use quire_core::{Fingerprint, RenderOptions};
//!
//! let options = RenderOptions::for_url("https://example.com");
//! let fingerprint = Fingerprint::of(&options).unwrap();
//! assert_eq!(fingerprint.to_hex().len(), 64);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{QuireError, Result};
pub use traits::*;
pub use types::*;
