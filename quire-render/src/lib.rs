//! Rendering adapters for Quire.
//!
//! The coalescer and HTTP layer only know [`quire_core::Renderer`]. This
//! crate provides the production implementation, which drives a headless
//! Chromium process.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod chromium;

pub use chromium::{ChromiumRenderer, RendererConfig};
