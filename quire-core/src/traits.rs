//! Common traits for Quire.
//!
//! The rendering engine sits behind [`Renderer`] so the HTTP layer and the
//! coalescer never depend on a particular browser integration.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::RenderOptions;

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Interface for turning a render request into output bytes.
///
/// Implementations might use:
/// - A headless browser process (production)
/// - A canned payload (tests)
///
/// Implementations must be deterministic and idempotent for identical
/// options: the coalescer hands one render's output to every caller that
/// submitted the same request.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders the document described by `options`.
    ///
    /// Returns PDF bytes or an encoded image, depending on
    /// [`RenderOptions::output`].
    async fn render(&self, options: &RenderOptions) -> Result<Bytes>;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "renderer"
    }
}
