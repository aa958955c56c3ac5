use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use handlebars::Handlebars;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{AppError, Result};
use crate::render::{CertificateFields, PageOptions, Renderer};

/// PostScript points per inch; zoom 1.0 renders at this resolution.
const BASE_DPI: f32 = 72.0;

/// Renders with `wkhtmltopdf` (HTML -> PDF) and `mutool` (page extraction, rasterizing).
pub struct CommandRenderer {
    wkhtmltopdf_bin: PathBuf,
    mutool_bin: PathBuf,
    templates: Handlebars<'static>,
}

impl CommandRenderer {
    pub fn new(wkhtmltopdf_bin: impl Into<PathBuf>, mutool_bin: impl Into<PathBuf>) -> Self {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        Self {
            wkhtmltopdf_bin: wkhtmltopdf_bin.into(),
            mutool_bin: mutool_bin.into(),
            templates,
        }
    }

    fn wkhtmltopdf_args(options: &PageOptions, output: &Path) -> Vec<String> {
        let m = options.margins_mm;
        vec![
            "--quiet".to_string(),
            "--enable-local-file-access".to_string(),
            "--page-size".to_string(),
            options.size.to_string(),
            "--orientation".to_string(),
            options.orientation.to_string(),
            "--margin-top".to_string(),
            format!("{}mm", m.top),
            "--margin-right".to_string(),
            format!("{}mm", m.right),
            "--margin-bottom".to_string(),
            format!("{}mm", m.bottom),
            "--margin-left".to_string(),
            format!("{}mm", m.left),
            "-".to_string(),
            output.display().to_string(),
        ]
    }

    fn resolution(zoom: f32) -> Result<u32> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(AppError::Validation(format!("Invalid zoom factor {zoom}")));
        }
        Ok((BASE_DPI * zoom).round().max(1.0) as u32)
    }
}

async fn run(mut command: Command, stdin: Option<&[u8]>, what: &str) -> Result<()> {
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| AppError::Render(format!("Failed to start {what}: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)
            .await
            .map_err(|e| AppError::Render(format!("Failed to feed {what}: {e}")))?;
        // Close stdin so the tool sees EOF.
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| AppError::Render(format!("{what} did not finish: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Render(format!(
            "{what} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    debug!("{what} finished");
    Ok(())
}

#[async_trait]
impl Renderer for CommandRenderer {
    fn render_html(&self, template: &str, fields: &CertificateFields) -> Result<String> {
        self.templates
            .render_template(template, fields)
            .map_err(|e| AppError::Render(format!("Failed to render certificate HTML: {e}")))
    }

    async fn html_to_pdf(&self, html: &str, options: &PageOptions, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.wkhtmltopdf_bin);
        command.args(Self::wkhtmltopdf_args(options, output));
        run(command, Some(html.as_bytes()), "wkhtmltopdf").await
    }

    async fn extract_first_page(&self, pdf: &Path, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.mutool_bin);
        command.arg("merge").arg("-o").arg(output).arg(pdf).arg("1");
        run(command, None, "mutool merge").await
    }

    async fn rasterize_first_page(&self, pdf: &Path, output: &Path, zoom: f32) -> Result<()> {
        let dpi = Self::resolution(zoom)?;
        let mut command = Command::new(&self.mutool_bin);
        command
            .arg("draw")
            .arg("-q")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-o")
            .arg(output)
            .arg(pdf)
            .arg("1");
        run(command, None, "mutool draw").await
    }
}
