//! Header band stamping.
//!
//! # Layout
//!
//! The band is laid out in the page's upright frame: the visible box (crop box
//! clipped to the media box), turned by the page's `/Rotate` so that it sits
//! along the edge a reader sees on top. In that frame the band occupies
//! `[top - band_height, top]`:
//!
//! ```text
//! top ─────────────────────────────────────
//!                  Header text               (centered)
//! top - band ──────────────────────────────  (separator rule)
//!              original page content
//! ```
//!
//! For rotated pages a `cm` maps the upright frame back onto user space.
//! Page count and page dimensions are never changed.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, warn};

use super::font::HeaderFont;
use super::page::{add_font_resource, overlay_content, rotation, visible_box};
use super::save_atomically;
use crate::config::HeaderConfig;
use crate::error::{Error, Result};

/// Resource name of the header font on stamped pages.
const FONT_RESOURCE: &str = "FHdr";

/// Cap height as a fraction of the font size, for vertical centering.
const CAP_HEIGHT_FACTOR: f32 = 0.7;

/// Inset of the separator rule from the page edges (in points).
const RULE_INSET: f32 = 36.0;

const RULE_WIDTH: f32 = 0.5;

/// Band geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderOptions {
    pub font_size: f32,
    pub band_height: f32,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        let config = HeaderConfig::default();
        Self {
            font_size: config.font_size,
            band_height: config.band_height,
        }
    }
}

impl From<&HeaderConfig> for HeaderOptions {
    fn from(config: &HeaderConfig) -> Self {
        Self {
            font_size: config.font_size,
            band_height: config.band_height,
        }
    }
}

/// Draws a header band on every page of a document.
#[derive(Debug, Clone, Default)]
pub struct HeaderStamper {
    font: HeaderFont,
    options: HeaderOptions,
}

impl HeaderStamper {
    pub const fn new(font: HeaderFont, options: HeaderOptions) -> Self {
        Self { font, options }
    }

    /// Stamper using the configured font (Helvetica when none is set).
    pub fn from_config(config: &HeaderConfig) -> Result<Self> {
        let font = HeaderFont::load(config.font_path.as_deref())?;
        Ok(Self::new(font, HeaderOptions::from(config)))
    }

    pub const fn options(&self) -> HeaderOptions {
        self.options
    }

    /// Stamp `text` on every page of `doc`. Returns the number of pages stamped.
    pub fn stamp(&self, doc: &mut Document, text: &str) -> Result<usize> {
        let text = text.trim();
        if !self.font.covers(text) {
            warn!("Header font cannot draw every character of {:?}; configure header.font_path", text);
        }

        let font_id = self.font.add_to_document(doc, text)?;
        let pages: Vec<_> = doc.get_pages().into_values().collect();

        for &page_id in &pages {
            let (frame, transform) = upright_frame(visible_box(doc, page_id), rotation(doc, page_id));
            let content = self.band_content(frame, transform, text);
            add_font_resource(doc, page_id, FONT_RESOURCE, font_id)?;
            overlay_content(doc, page_id, &content)?;
        }

        debug!("Stamped header on {} pages", pages.len());
        Ok(pages.len())
    }

    /// Stamp the PDF at `input`, writing to `output` or back over `input`.
    pub fn stamp_file(&self, input: &Path, output: Option<&Path>, text: &str) -> Result<PathBuf> {
        if !input.is_file() {
            return Err(Error::SourceMissing(input.to_path_buf()));
        }
        let mut doc = Document::load(input)
            .map_err(|e| Error::Lopdf(format!("Failed to load {}: {e}", input.display())))?;
        self.stamp(&mut doc, text)?;
        doc.compress();

        let target = output.unwrap_or(input);
        save_atomically(&mut doc, target)?;
        Ok(target.to_path_buf())
    }

    /// Content stream drawing the text and rule inside `frame`.
    fn band_content(&self, frame: [f32; 4], transform: Option<[f32; 6]>, text: &str) -> String {
        let [x0, _, x1, top] = frame;
        let page_width = x1 - x0;
        let size = self.options.font_size;
        let band_bottom = top - self.options.band_height;

        let mut content = String::from("q\n");
        if let Some(matrix) = transform {
            let operands: Vec<String> = matrix.iter().map(|&v| fmt_num(v)).collect();
            let _ = writeln!(content, "{} cm", operands.join(" "));
        }

        if !text.is_empty() {
            let text_width = self.font.text_width(text, size);
            let x = x0 + (page_width - text_width) / 2.0;
            let y = band_bottom + (self.options.band_height - size * CAP_HEIGHT_FACTOR) / 2.0;
            let _ = writeln!(
                content,
                "BT\n0 g\n/{FONT_RESOURCE} {} Tf\n{} {} Td\n{} Tj\nET",
                fmt_num(size),
                fmt_num(x),
                fmt_num(y),
                self.font.show_operand(text)
            );
        }

        let inset = RULE_INSET.min(page_width / 10.0);
        let _ = writeln!(
            content,
            "0 G\n{} w\n{} {} m\n{} {} l\nS",
            fmt_num(RULE_WIDTH),
            fmt_num(x0 + inset),
            fmt_num(band_bottom),
            fmt_num(x1 - inset),
            fmt_num(band_bottom)
        );

        content.push_str("Q\n");
        content
    }
}

/// The upright frame of a page and the matrix taking it to user space.
///
/// Unrotated pages are drawn directly in user space over the visible box.
fn upright_frame(visible: [f32; 4], rotation: i64) -> ([f32; 4], Option<[f32; 6]>) {
    let [x0, y0, x1, y1] = visible;
    let (width, height) = (x1 - x0, y1 - y0);
    match rotation {
        90 => ([0.0, 0.0, height, width], Some([0.0, 1.0, -1.0, 0.0, x1, y0])),
        180 => ([0.0, 0.0, width, height], Some([-1.0, 0.0, 0.0, -1.0, x1, y1])),
        270 => ([0.0, 0.0, height, width], Some([0.0, -1.0, 1.0, 0.0, x0, y1])),
        _ => (visible, None),
    }
}

/// Number with at most two decimals, as content streams expect.
fn fmt_num(value: f32) -> String {
    let s = format!("{value:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}

/// Stamp a header with the built-in font.
///
/// Overwrites `input` unless `output` is given.
pub fn stamp_header_file(
    input: &Path,
    output: Option<&Path>,
    text: &str,
    font_size: f32,
    band_height: f32,
) -> Result<PathBuf> {
    HeaderStamper::new(
        HeaderFont::Helvetica,
        HeaderOptions {
            font_size,
            band_height,
        },
    )
    .stamp_file(input, output, text)
}
