//! App state: render store, coalescer, renderer, config.

use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use quire_cache::{CacheConfig, Coalescer, RenderStore};
use quire_core::traits::Renderer;
use quire_render::{ChromiumRenderer, RendererConfig};

/// Largest accepted request body.
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Render store and follower wait settings
    pub cache: CacheConfig,
    /// Browser settings
    pub renderer: RendererConfig,
    /// Allow cross-origin requests from any origin
    pub allow_cors: bool,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            renderer: RendererConfig::default(),
            allow_cors: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ApiConfig {
    /// Builds config from the environment, loading `.env` first if present.
    ///
    /// Unset variables keep their defaults; unparseable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let cache = CacheConfig {
            max_entries: env_or("QUIRE_MAX_ENTRIES", defaults.cache.max_entries),
            default_ttl_seconds: env_or("QUIRE_CACHE_TTL_SECS", defaults.cache.default_ttl_seconds),
            sweep_multiplier: env_or("QUIRE_SWEEP_MULTIPLIER", defaults.cache.sweep_multiplier),
            retry_interval_ms: env_or("QUIRE_RETRY_INTERVAL_MS", defaults.cache.retry_interval_ms),
            max_attempts: env_or("QUIRE_MAX_ATTEMPTS", defaults.cache.max_attempts),
        };

        let mut renderer = defaults.renderer;
        if let Ok(binary) = std::env::var("QUIRE_CHROMIUM_BIN") {
            renderer.binary = binary.into();
        }
        renderer.timeout_seconds = env_or("QUIRE_RENDER_TIMEOUT_SECS", renderer.timeout_seconds);
        renderer.no_sandbox = std::env::var("QUIRE_NO_SANDBOX")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            cache,
            renderer,
            allow_cors: std::env::var("ALLOW_CORS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            max_body_bytes: env_or("QUIRE_MAX_BODY_BYTES", defaults.max_body_bytes),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            default
        }),
        Err(_) => default,
    }
}

/// Shared state handed to every handler.
pub struct AppState {
    /// Server configuration
    pub config: ApiConfig,
    /// Store the coalescer coordinates through
    pub store: Arc<RenderStore>,
    /// Single-flight gate for POST renders
    pub coalescer: Coalescer,
    /// Rendering engine
    pub renderer: Arc<dyn Renderer>,
}

impl AppState {
    /// Creates state backed by a Chromium renderer.
    pub fn new(config: ApiConfig) -> Self {
        let renderer = Arc::new(ChromiumRenderer::with_config(config.renderer.clone()));
        Self::with_renderer(config, renderer)
    }

    /// Creates state with an explicit renderer.
    pub fn with_renderer(config: ApiConfig, renderer: Arc<dyn Renderer>) -> Self {
        let store = Arc::new(RenderStore::with_config(config.cache.clone()));
        let coalescer = Coalescer::new(Arc::clone(&store));

        Self {
            config,
            store,
            coalescer,
            renderer,
        }
    }
}
