//! Headless Chromium renderer.
//!
//! Each render launches a short-lived browser process that prints or
//! screenshots one page into a scratch directory. Options the Chromium
//! command line cannot express (header templates, clip rectangles, selector
//! waits) are accepted but have no effect here.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use quire_core::constants::{
    DEFAULT_RENDER_TIMEOUT_SECONDS, DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH,
};
use quire_core::error::{QuireError, Result};
use quire_core::traits::Renderer;
use quire_core::types::{OutputFormat, RenderOptions, WaitFor};

/// Longest stderr excerpt carried into a render error.
const STDERR_EXCERPT: usize = 512;

/// Chromium renderer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Browser executable, resolved through `PATH` if not absolute
    pub binary: PathBuf,
    /// Render timeout in seconds when the request sets none
    pub timeout_seconds: u64,
    /// Pass `--no-sandbox` (needed when running as root in containers)
    pub no_sandbox: bool,
    /// Extra arguments placed before the generated flags
    pub extra_args: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("chromium"),
            timeout_seconds: DEFAULT_RENDER_TIMEOUT_SECONDS,
            no_sandbox: false,
            extra_args: Vec::new(),
        }
    }
}

impl RendererConfig {
    /// Creates config for the given browser executable.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// Sets the default render timeout.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Disables the browser sandbox.
    pub fn with_no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.no_sandbox = no_sandbox;
        self
    }

    /// Appends an extra command-line argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

/// Renders pages by driving a headless Chromium process.
pub struct ChromiumRenderer {
    config: RendererConfig,
}

impl ChromiumRenderer {
    /// Creates a renderer with default config.
    pub fn new() -> Self {
        Self::with_config(RendererConfig::default())
    }

    /// Creates a renderer with the given config.
    pub fn with_config(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Time allowed for one render. `goto.timeout` (milliseconds) wins over
    /// the configured default.
    pub fn deadline(&self, options: &RenderOptions) -> Duration {
        match options.goto.timeout {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => Duration::from_secs(self.config.timeout_seconds),
        }
    }

    /// Builds the browser argument list for one render.
    ///
    /// `source` is the address to load and `output` the file the browser
    /// writes to.
    pub fn build_args(&self, options: &RenderOptions, source: &str, output: &Path) -> Vec<String> {
        let mut args = self.config.extra_args.clone();

        args.extend(
            [
                "--headless",
                "--disable-gpu",
                "--hide-scrollbars",
                "--no-first-run",
                "--no-default-browser-check",
            ]
            .map(String::from),
        );

        if self.config.no_sandbox {
            args.push("--no-sandbox".into());
        }
        if options.ignore_https_errors == Some(true) {
            args.push("--ignore-certificate-errors".into());
        }

        let viewport = &options.viewport;
        let mut width = viewport.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH);
        let mut height = viewport.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT);
        if viewport.is_landscape == Some(true) && height > width {
            std::mem::swap(&mut width, &mut height);
        }
        args.push(format!("--window-size={width},{height}"));

        if let Some(scale) = viewport.device_scale_factor {
            args.push(format!("--force-device-scale-factor={scale}"));
        }
        if let Some(WaitFor::Millis(ms)) = options.wait_for {
            args.push(format!("--virtual-time-budget={ms}"));
        }

        match options.output {
            OutputFormat::Pdf => {
                if options.pdf.display_header_footer != Some(true) {
                    args.push("--no-pdf-header-footer".into());
                }
                args.push(format!("--print-to-pdf={}", output.display()));
            }
            OutputFormat::Screenshot => {
                if options.screenshot.omit_background == Some(true) {
                    args.push("--default-background-color=00000000".into());
                }
                args.push(format!("--screenshot={}", output.display()));
            }
        }

        args.push(source.to_string());
        args
    }
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    #[instrument(skip(self, options), fields(output = ?options.output))]
    async fn render(&self, options: &RenderOptions) -> Result<Bytes> {
        options.validate()?;

        if let Some(WaitFor::Selector(selector)) = &options.wait_for {
            warn!(%selector, "Selector waits are not supported by the Chromium renderer; ignoring");
        }

        let workdir = tempfile::tempdir()?;

        let source = match (&options.html, &options.url) {
            (Some(html), _) => {
                let input = workdir.path().join("input.html");
                tokio::fs::write(&input, html).await?;
                format!("file://{}", input.display())
            }
            (None, Some(url)) => url.clone(),
            (None, None) => {
                return Err(QuireError::InvalidOptions("url or html is required".into()));
            }
        };

        let output = workdir
            .path()
            .join(format!("output.{}", options.file_extension()));
        let args = self.build_args(options, &source, &output);
        let deadline = self.deadline(options);

        debug!(
            binary = %self.config.binary.display(),
            timeout_ms = deadline.as_millis() as u64,
            "Launching browser"
        );

        let run = tokio::process::Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let finished = match tokio::time::timeout(deadline, run).await {
            Ok(result) => result.map_err(|e| {
                QuireError::RenderFailed(format!(
                    "failed to launch {}: {}",
                    self.config.binary.display(),
                    e
                ))
            })?,
            Err(_) => {
                return Err(QuireError::RenderTimeout {
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
        };

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(QuireError::RenderFailed(format!(
                "browser exited with {}: {}",
                finished.status, excerpt
            )));
        }

        let rendered = tokio::fs::read(&output)
            .await
            .map_err(|e| QuireError::RenderFailed(format!("browser produced no output: {e}")))?;

        if rendered.is_empty() {
            return Err(QuireError::RenderFailed("browser produced an empty file".into()));
        }

        debug!(size = rendered.len(), "Render complete");
        Ok(Bytes::from(rendered))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::types::ImageType;

    fn output() -> PathBuf {
        PathBuf::from("/tmp/out.pdf")
    }

    #[test]
    fn test_pdf_args() {
        let renderer = ChromiumRenderer::new();
        let options = RenderOptions::for_url("https://example.com");

        let args = renderer.build_args(&options, "https://example.com", &output());

        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--window-size=1600,1200".to_string()));
        assert!(args.contains(&"--no-pdf-header-footer".to_string()));
        assert!(args.contains(&"--print-to-pdf=/tmp/out.pdf".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--screenshot")));
        assert!(!args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com"));
    }

    #[test]
    fn test_screenshot_args() {
        let renderer = ChromiumRenderer::with_config(RendererConfig::default().with_no_sandbox(true));
        let mut options = RenderOptions::for_url("https://example.com");
        options.output = OutputFormat::Screenshot;
        options.screenshot.kind = ImageType::Jpeg;
        options.screenshot.omit_background = Some(true);
        options.viewport.width = Some(800);
        options.viewport.height = Some(600);
        options.viewport.device_scale_factor = Some(2.0);
        options.wait_for = Some(WaitFor::Millis(250));
        options.ignore_https_errors = Some(true);

        let args = renderer.build_args(&options, "https://example.com", Path::new("/tmp/out.jpg"));

        assert!(args.contains(&"--screenshot=/tmp/out.jpg".to_string()));
        assert!(args.contains(&"--window-size=800,600".to_string()));
        assert!(args.contains(&"--force-device-scale-factor=2".to_string()));
        assert!(args.contains(&"--virtual-time-budget=250".to_string()));
        assert!(args.contains(&"--default-background-color=00000000".to_string()));
        assert!(args.contains(&"--ignore-certificate-errors".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--print-to-pdf")));
    }

    #[test]
    fn test_landscape_swaps_dimensions() {
        let renderer = ChromiumRenderer::new();
        let mut options = RenderOptions::for_url("https://example.com");
        options.viewport.width = Some(600);
        options.viewport.height = Some(900);
        options.viewport.is_landscape = Some(true);

        let args = renderer.build_args(&options, "https://example.com", &output());
        assert!(args.contains(&"--window-size=900,600".to_string()));
    }

    #[test]
    fn test_extra_args_come_first() {
        let config = RendererConfig::new("sh").with_arg("script.sh");
        let renderer = ChromiumRenderer::with_config(config);
        let options = RenderOptions::for_url("https://example.com");

        let args = renderer.build_args(&options, "https://example.com", &output());
        assert_eq!(args[0], "script.sh");
    }

    #[test]
    fn test_header_footer_flag_respects_option() {
        let renderer = ChromiumRenderer::new();
        let mut options = RenderOptions::for_url("https://example.com");
        options.pdf.display_header_footer = Some(true);

        let args = renderer.build_args(&options, "https://example.com", &output());
        assert!(!args.contains(&"--no-pdf-header-footer".to_string()));
    }

    #[test]
    fn test_deadline() {
        let renderer = ChromiumRenderer::with_config(RendererConfig::default().with_timeout_seconds(7));
        let mut options = RenderOptions::for_url("https://example.com");
        assert_eq!(renderer.deadline(&options), Duration::from_secs(7));

        options.goto.timeout = Some(1500);
        assert_eq!(renderer.deadline(&options), Duration::from_millis(1500));

        options.goto.timeout = Some(0);
        assert_eq!(renderer.deadline(&options), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let renderer = ChromiumRenderer::with_config(RendererConfig::new(
            "/nonexistent/quire-test-browser",
        ));
        let options = RenderOptions::for_url("https://example.com");

        let err = renderer.render(&options).await.unwrap_err();
        assert!(matches!(err, QuireError::RenderFailed(ref msg) if msg.contains("failed to launch")));
    }

    #[tokio::test]
    async fn test_rejects_invalid_options() {
        let renderer = ChromiumRenderer::new();
        let err = renderer.render(&RenderOptions::default()).await.unwrap_err();
        assert!(err.is_client_error());
    }

    /// Runs a shell script in place of the browser. The script is passed to
    /// `sh` as an argument so it never needs to be executable.
    #[cfg(unix)]
    mod scripted {
        use super::*;

        fn renderer_for(script: &str) -> (tempfile::TempDir, ChromiumRenderer) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("browser.sh");
            std::fs::write(&path, script).unwrap();
            let config = RendererConfig::new("sh").with_arg(path.display().to_string());
            (dir, ChromiumRenderer::with_config(config))
        }

        const FAKE_BROWSER: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --print-to-pdf=*) printf '%%PDF-fake' > "${arg#--print-to-pdf=}" ;;
    --screenshot=*) printf 'IMG' > "${arg#--screenshot=}" ;;
  esac
done
"#;

        #[tokio::test]
        async fn test_renders_pdf() {
            let (_dir, renderer) = renderer_for(FAKE_BROWSER);
            let options = RenderOptions::for_url("https://example.com");

            let bytes = renderer.render(&options).await.unwrap();
            assert_eq!(&bytes[..], b"%PDF-fake");
        }

        #[tokio::test]
        async fn test_renders_inline_html_screenshot() {
            let (_dir, renderer) = renderer_for(FAKE_BROWSER);
            let mut options = RenderOptions::for_html("<h1>hi</h1>");
            options.output = OutputFormat::Screenshot;

            let bytes = renderer.render(&options).await.unwrap();
            assert_eq!(&bytes[..], b"IMG");
        }

        #[tokio::test]
        async fn test_nonzero_exit_carries_stderr() {
            let (_dir, renderer) = renderer_for("echo 'net::ERR_NAME_NOT_RESOLVED' >&2\nexit 3\n");
            let options = RenderOptions::for_url("https://example.invalid");

            let err = renderer.render(&options).await.unwrap_err();
            match err {
                QuireError::RenderFailed(msg) => assert!(msg.contains("ERR_NAME_NOT_RESOLVED")),
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_missing_output_is_failure() {
            let (_dir, renderer) = renderer_for("exit 0\n");
            let options = RenderOptions::for_url("https://example.com");

            let err = renderer.render(&options).await.unwrap_err();
            assert!(matches!(err, QuireError::RenderFailed(_)));
        }

        #[tokio::test]
        async fn test_timeout() {
            let (_dir, renderer) = renderer_for("sleep 5\n");
            let mut options = RenderOptions::for_url("https://example.com");
            options.goto.timeout = Some(100);

            let started = std::time::Instant::now();
            let err = renderer.render(&options).await.unwrap_err();
            assert!(matches!(err, QuireError::RenderTimeout { timeout_ms: 100 }));
            assert!(err.to_string().contains("100ms"));
            assert!(started.elapsed() < Duration::from_secs(3));
        }
    }
}
