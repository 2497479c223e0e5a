//! Render request options.
//!
//! Options arrive either as flat query parameters with dotted keys
//! (`viewport.width=800`, `pdf.margin.top=1cm`) or as a JSON body. Both
//! forms end up in [`RenderOptions`], whose typed fields are what the
//! request fingerprint is computed over: `"800"` in a query string and
//! `800` in a JSON body describe the same request.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::{MIME_JPEG, MIME_PDF, MIME_PNG};
use crate::error::{QuireError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// What the renderer should produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// A PDF document.
    #[default]
    Pdf,
    /// A raster image of the page.
    Screenshot,
}

impl FromStr for OutputFormat {
    type Err = QuireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "screenshot" => Ok(Self::Screenshot),
            other => Err(QuireError::InvalidOptions(format!("unknown output: {other}"))),
        }
    }
}

/// Encoding of a screenshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Lossless PNG.
    #[default]
    Png,
    /// JPEG, honors `screenshot.quality`.
    Jpeg,
}

impl FromStr for ImageType {
    type Err = QuireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            other => Err(QuireError::InvalidOptions(format!(
                "unknown screenshot type: {other}"
            ))),
        }
    }
}

/// What to wait for after navigation before capturing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitFor {
    /// A fixed delay in milliseconds.
    Millis(u64),
    /// A CSS selector that must appear.
    Selector(String),
}

impl From<&str> for WaitFor {
    fn from(s: &str) -> Self {
        match s.trim().parse::<u64>() {
            Ok(ms) => WaitFor::Millis(ms),
            Err(_) => WaitFor::Selector(s.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NESTED OPTION GROUPS
// ═══════════════════════════════════════════════════════════════════════════════

/// Browser viewport.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Viewport {
    /// Width in CSS pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Height in CSS pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Device pixel ratio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_scale_factor: Option<f64>,
    /// Emulate a mobile device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_mobile: Option<bool>,
    /// Report touch support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_touch: Option<bool>,
    /// Landscape orientation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_landscape: Option<bool>,
}

/// Navigation settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GotoOptions {
    /// Navigation deadline in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Load event to wait for (`load`, `networkidle`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<String>,
    /// Open requests tolerated while waiting for network idle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_idle_inflight: Option<u32>,
    /// Quiet period, in milliseconds, that counts as network idle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_idle_timeout: Option<u64>,
}

/// PDF page margins, as CSS lengths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margin {
    /// Top margin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    /// Right margin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    /// Bottom margin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
    /// Left margin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
}

/// PDF output settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfOptions {
    /// Rendering scale, 0.1-2
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Print header and footer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_header_footer: Option<bool>,
    /// HTML template for the footer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer_template: Option<String>,
    /// HTML template for the header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_template: Option<String>,
    /// Landscape paper orientation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landscape: Option<bool>,
    /// Page ranges such as `1-3, 5`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
    /// Paper format such as `A4` or `Letter`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Paper width; overrides `format`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    /// Paper height; overrides `format`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    /// Page margins
    pub margin: Margin,
    /// Include background graphics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_background: Option<bool>,
}

/// Screenshot clip rectangle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clip {
    /// Left edge in CSS pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Top edge in CSS pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Width in CSS pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Height in CSS pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl Clip {
    /// True when no coordinate was given.
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.width.is_none() && self.height.is_none()
    }
}

/// Screenshot output settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenshotOptions {
    /// Capture the full scrollable page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
    /// JPEG quality, 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Image encoding
    #[serde(rename = "type")]
    pub kind: ImageType,
    /// Region to capture
    pub clip: Clip,
    /// Transparent instead of white background
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omit_background: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Full description of a render request.
///
/// At least one of `url` or `html` must be set; when both are, `html` is
/// rendered.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    /// Page to load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline document to render instead of a URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Serve the output as a download with this file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    /// Scroll through the page before rendering to trigger lazy content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_page: Option<bool>,
    /// Use `screen` instead of `print` CSS media
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emulate_screen_media: Option<bool>,
    /// Accept invalid TLS certificates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_https_errors: Option<bool>,
    /// Delay or selector to wait for after load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitFor>,
    /// PDF or screenshot
    pub output: OutputFormat,
    /// Browser viewport
    pub viewport: Viewport,
    /// Navigation settings
    pub goto: GotoOptions,
    /// PDF settings
    pub pdf: PdfOptions,
    /// Screenshot settings
    pub screenshot: ScreenshotOptions,
}

impl RenderOptions {
    /// Creates options that render `url` to PDF with all defaults.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Creates options that render an inline HTML document to PDF.
    pub fn for_html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }

    /// Parses flat query parameters with dotted keys.
    ///
    /// Empty values are treated as absent. Numbers and booleans are parsed
    /// strictly; a malformed value is an [`QuireError::InvalidOptions`].
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self> {
        let q = QueryReader(query);

        Ok(Self {
            url: q.text("url"),
            html: None,
            attachment_name: q.text("attachmentName"),
            scroll_page: q.flag("scrollPage")?,
            emulate_screen_media: q.flag("emulateScreenMedia")?,
            ignore_https_errors: q.flag("ignoreHttpsErrors")?,
            wait_for: q.text("waitFor").as_deref().map(WaitFor::from),
            output: q.parse("output")?.unwrap_or_default(),
            viewport: Viewport {
                width: q.parse("viewport.width")?,
                height: q.parse("viewport.height")?,
                device_scale_factor: q.parse("viewport.deviceScaleFactor")?,
                is_mobile: q.flag("viewport.isMobile")?,
                has_touch: q.flag("viewport.hasTouch")?,
                is_landscape: q.flag("viewport.isLandscape")?,
            },
            goto: GotoOptions {
                timeout: q.parse("goto.timeout")?,
                wait_until: q.text("goto.waitUntil"),
                network_idle_inflight: q.parse("goto.networkIdleInflight")?,
                network_idle_timeout: q.parse("goto.networkIdleTimeout")?,
            },
            pdf: PdfOptions {
                scale: q.parse("pdf.scale")?,
                display_header_footer: q.flag("pdf.displayHeaderFooter")?,
                footer_template: q.text("pdf.footerTemplate"),
                header_template: q.text("pdf.headerTemplate"),
                landscape: q.flag("pdf.landscape")?,
                page_ranges: q.text("pdf.pageRanges"),
                format: q.text("pdf.format"),
                width: q.text("pdf.width"),
                height: q.text("pdf.height"),
                margin: Margin {
                    top: q.text("pdf.margin.top"),
                    right: q.text("pdf.margin.right"),
                    bottom: q.text("pdf.margin.bottom"),
                    left: q.text("pdf.margin.left"),
                },
                print_background: q.flag("pdf.printBackground")?,
            },
            screenshot: ScreenshotOptions {
                full_page: q.flag("screenshot.fullPage")?,
                quality: q.parse("screenshot.quality")?,
                kind: q.parse("screenshot.type")?.unwrap_or_default(),
                clip: Clip {
                    x: q.parse("screenshot.clip.x")?,
                    y: q.parse("screenshot.clip.y")?,
                    width: q.parse("screenshot.clip.width")?,
                    height: q.parse("screenshot.clip.height")?,
                },
                omit_background: q.flag("screenshot.omitBackground")?,
            },
        })
    }

    /// Builds options from a JSON body, deep-merged over the defaults
    /// `{"output": "pdf", "screenshot": {"type": "png"}}`.
    pub fn from_json(body: Value) -> Result<Self> {
        let mut merged = json!({
            "output": "pdf",
            "screenshot": { "type": "png" },
        });
        merge_json(&mut merged, body);

        serde_json::from_value(merged).map_err(|e| QuireError::InvalidOptions(e.to_string()))
    }

    /// Checks that the options describe a renderable request.
    pub fn validate(&self) -> Result<()> {
        let has_url = self.url.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_html = self.html.is_some();
        if !has_url && !has_html {
            return Err(QuireError::ValidationError(
                "either url or html must be provided".into(),
            ));
        }

        if let Some(quality) = self.screenshot.quality {
            if quality > 100 {
                return Err(QuireError::ValidationError(format!(
                    "screenshot.quality must be 0-100, got {quality}"
                )));
            }
            if self.screenshot.kind != ImageType::Jpeg {
                return Err(QuireError::ValidationError(
                    "screenshot.quality is only supported for jpeg".into(),
                ));
            }
        }

        if matches!(self.viewport.width, Some(0)) || matches!(self.viewport.height, Some(0)) {
            return Err(QuireError::ValidationError(
                "viewport dimensions must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Returns the `Content-Type` of the rendered output.
    pub fn mime_type(&self) -> &'static str {
        match self.output {
            OutputFormat::Pdf => MIME_PDF,
            OutputFormat::Screenshot => match self.screenshot.kind {
                ImageType::Png => MIME_PNG,
                ImageType::Jpeg => MIME_JPEG,
            },
        }
    }

    /// Returns a file extension matching [`Self::mime_type`].
    pub fn file_extension(&self) -> &'static str {
        match self.output {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Screenshot => match self.screenshot.kind {
                ImageType::Png => "png",
                ImageType::Jpeg => "jpg",
            },
        }
    }
}

/// Recursively merges `source` into `target`.
///
/// Objects merge key by key; any other source value replaces the target,
/// except `null`, which leaves the target untouched.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None if !value.is_null() => {
                        target.insert(key, value);
                    }
                    None => {}
                }
            }
        }
        (_, Value::Null) => {}
        (target, source) => *target = source,
    }
}

/// Returns `value` with every object's keys in sorted order.
pub fn canonicalize_json(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, canonicalize_json(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_json).collect()),
        other => other,
    }
}

struct QueryReader<'a>(&'a HashMap<String, String>);

impl QueryReader<'_> {
    fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.text(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| QuireError::InvalidOptions(format!("{key}={raw}: {e}"))),
            None => Ok(None),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.text(key).as_deref().map(str::trim) {
            None => Ok(None),
            Some("true" | "1") => Ok(Some(true)),
            Some("false" | "0") => Ok(Some(false)),
            Some(other) => Err(QuireError::InvalidOptions(format!(
                "{key}={other}: expected true or false"
            ))),
        }
    }
}
