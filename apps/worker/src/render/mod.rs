// Renderer collaborator: HTML template -> PDF -> single-page PDF -> PNG.
// Rendering shells out to external tools; callers hold no locks across these calls.

pub mod command;
pub mod template;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use command::CommandRenderer;

/// Values substituted into the certificate template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateFields {
    /// Background image, as a path or URL the PDF engine can load.
    pub template_img: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    A4,
    A5,
    Letter,
    Legal,
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageSize::A4 => "A4",
            PageSize::A5 => "A5",
            PageSize::Letter => "Letter",
            PageSize::Legal => "Legal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Portrait => f.write_str("Portrait"),
            Orientation::Landscape => f.write_str("Landscape"),
        }
    }
}

/// Margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

/// Page setup of the generated PDF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageOptions {
    pub size: PageSize,
    pub orientation: Orientation,
    pub margins_mm: Margins,
}

impl Default for PageOptions {
    /// Full-bleed A4 landscape.
    fn default() -> Self {
        Self {
            size: PageSize::A4,
            orientation: Orientation::Landscape,
            margins_mm: Margins::default(),
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Fills `template` (Handlebars syntax) with `fields`.
    fn render_html(&self, template: &str, fields: &CertificateFields) -> Result<String>;

    async fn html_to_pdf(&self, html: &str, options: &PageOptions, output: &Path) -> Result<()>;

    /// Writes page 1 of `pdf` as a standalone PDF.
    async fn extract_first_page(&self, pdf: &Path, output: &Path) -> Result<()>;

    /// Rasterizes page 1 of `pdf` to PNG. `zoom` 1.0 is 72 dpi.
    async fn rasterize_first_page(&self, pdf: &Path, output: &Path, zoom: f32) -> Result<()>;
}
