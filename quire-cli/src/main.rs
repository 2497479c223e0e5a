//! Quire CLI
//!
//! Command-line interface for the Quire rendering service.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quire_api::{ApiConfig, ApiServer};
use quire_core::traits::Renderer;
use quire_core::types::{Fingerprint, ImageType, OutputFormat, RenderOptions};
use quire_render::ChromiumRenderer;

/// Quire - render web pages to PDF and images
#[derive(Parser)]
#[command(name = "quire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value = "9000")]
        port: u16,
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,
        /// Render store TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Delay between a follower's checks, in milliseconds
        #[arg(long)]
        retry_interval_ms: Option<u64>,
        /// Checks a follower makes before answering 503
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Browser executable
        #[arg(long)]
        chromium: Option<PathBuf>,
        /// Run the browser without its sandbox
        #[arg(long)]
        no_sandbox: bool,
    },

    /// Render a page once and write it to disk
    Render {
        /// Page to render
        #[arg(long, conflicts_with = "html_file", required_unless_present = "html_file")]
        url: Option<String>,
        /// Local HTML file to render
        #[arg(long)]
        html_file: Option<PathBuf>,
        /// Output kind: pdf or screenshot
        #[arg(long, default_value = "pdf")]
        output: String,
        /// Screenshot type: png or jpeg
        #[arg(long = "type", default_value = "png")]
        image_type: String,
        /// Destination file (defaults to render.<ext>)
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
        /// Browser executable
        #[arg(long, env = "QUIRE_CHROMIUM_BIN", default_value = "chromium")]
        chromium: PathBuf,
        /// Render timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Print the request fingerprint for a JSON options file
    Fingerprint {
        /// Options file, as posted to /api/render
        options: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Serve {
            port,
            bind,
            ttl,
            retry_interval_ms,
            max_attempts,
            chromium,
            no_sandbox,
        } => {
            let mut config = ApiConfig::from_env();
            if let Some(ttl) = ttl {
                config.cache.default_ttl_seconds = ttl;
            }
            if let Some(ms) = retry_interval_ms {
                config.cache.retry_interval_ms = ms;
            }
            if let Some(attempts) = max_attempts {
                config.cache.max_attempts = attempts;
            }
            if let Some(binary) = chromium {
                config.renderer.binary = binary;
            }
            config.renderer.no_sandbox |= no_sandbox;
            cmd_serve(config, port, &bind).await
        }
        Commands::Render {
            url,
            html_file,
            output,
            image_type,
            out,
            chromium,
            timeout,
        } => {
            let options = build_options(url, html_file.as_deref(), &output, &image_type)?;
            let renderer = ChromiumRenderer::with_config(
                quire_render::RendererConfig::new(chromium).with_timeout_seconds(timeout),
            );
            cmd_render(&renderer, &options, out).await
        }
        Commands::Fingerprint { options } => cmd_fingerprint(&options),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "quire=debug,info"
    } else {
        "quire=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Builds render options from command-line arguments.
fn build_options(
    url: Option<String>,
    html_file: Option<&Path>,
    output: &str,
    image_type: &str,
) -> Result<RenderOptions> {
    let mut options = match (url, html_file) {
        (Some(url), _) => RenderOptions::for_url(url),
        (None, Some(path)) => {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            RenderOptions::for_html(html)
        }
        (None, None) => bail!("either --url or --html-file is required"),
    };

    options.output = output.parse::<OutputFormat>()?;
    options.screenshot.kind = image_type.parse::<ImageType>()?;
    options.validate()?;
    Ok(options)
}

/// Run API server
async fn cmd_serve(config: ApiConfig, port: u16, bind: &str) -> Result<()> {
    println!("{}", "🚀 Starting Quire API server...".cyan().bold());
    println!("   {} http://{}:{}", "Listening on:".green(), bind, port);
    println!("   {} http://{}:{}/health", "Health check:".dimmed(), bind, port);
    println!(
        "   {} {}s TTL, {} x {}ms follower wait",
        "Render store:".dimmed(),
        config.cache.default_ttl_seconds,
        config.cache.max_attempts,
        config.cache.retry_interval_ms
    );
    println!("\n   Press Ctrl+C to stop.\n");

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .context("Invalid bind address")?;

    tracing::info!(%addr, "Starting API server");
    let server = ApiServer::new(config);
    server.run(addr).await.context("Server failed")?;
    tracing::info!("Server exited cleanly");

    Ok(())
}

/// Render a single page
async fn cmd_render(
    renderer: &dyn Renderer,
    options: &RenderOptions,
    out: Option<PathBuf>,
) -> Result<()> {
    let target = options
        .url
        .clone()
        .unwrap_or_else(|| "inline HTML".to_string());
    println!("{} {}", "🖨  Rendering:".cyan().bold(), target);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("   {spinner:.green} {msg} [{elapsed}]")?);
    spinner.set_message(format!("waiting for {}", renderer.name()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = renderer.render(options).await;
    spinner.finish_and_clear();
    let payload = result.context("Render failed")?;
    tracing::info!(size = payload.len(), renderer = renderer.name(), "Render finished");

    let path = out.unwrap_or_else(|| PathBuf::from(format!("render.{}", options.file_extension())));
    std::fs::write(&path, &payload)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} {}", "✅ Saved to:".green(), path.display());
    println!("   {} {}", "Type:".dimmed(), options.mime_type());
    println!("   {} {} bytes", "Size:".dimmed(), payload.len());

    Ok(())
}

/// Print the fingerprint of an options file
fn cmd_fingerprint(path: &Path) -> Result<()> {
    let fingerprint = fingerprint_file(path)?;
    println!("{}", fingerprint.to_hex());
    Ok(())
}

fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let body: serde_json::Value = serde_json::from_str(&raw).context("Options file is not valid JSON")?;
    let options = RenderOptions::from_json(body)?;
    Ok(Fingerprint::of(&options)?)
}
