//! Service constants for Quire.
//!
//! Cache and coalescing values here are defaults only; every one of them
//! can be overridden through configuration.

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default lifetime of a cache entry in seconds.
/// Should comfortably exceed the expected render latency, otherwise a
/// pending marker can expire under a running leader.
pub const DEFAULT_TTL_SECONDS: u64 = 120;

/// The background sweep runs every `default_ttl * SWEEP_MULTIPLIER`.
pub const DEFAULT_SWEEP_MULTIPLIER: f64 = 1.5;

/// Default upper bound on stored entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// FOLLOWER WAIT BUDGET
// ═══════════════════════════════════════════════════════════════════════════════

/// Interval between a follower's checks on an in-flight render.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;

/// Number of checks a follower makes before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ═══════════════════════════════════════════════════════════════════════════════
// FINGERPRINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Size of a request fingerprint in bytes (SHA3-256 output).
pub const FINGERPRINT_SIZE: usize = 32;

/// Domain separator mixed into every request fingerprint.
pub const DOMAIN_REQUEST_FINGERPRINT: &[u8] = b"QUIRE_RENDER_REQUEST_V1";

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Default deadline for a single render, in seconds.
pub const DEFAULT_RENDER_TIMEOUT_SECONDS: u64 = 30;

/// Viewport used when a request does not specify one.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1600;

/// See [`DEFAULT_VIEWPORT_WIDTH`].
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1200;

/// MIME type of PDF output.
pub const MIME_PDF: &str = "application/pdf";

/// MIME type of PNG screenshots.
pub const MIME_PNG: &str = "image/png";

/// MIME type of JPEG screenshots.
pub const MIME_JPEG: &str = "image/jpeg";
