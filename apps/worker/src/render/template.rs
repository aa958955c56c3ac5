use std::path::Path;

use anyhow::Context;

use crate::errors::Result;

/// Full-page background image with the registrant's name centred over it.
pub const DEFAULT_CERTIFICATE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  html, body { margin: 0; padding: 0; width: 100%; height: 100%; }
  .page { position: relative; width: 297mm; height: 210mm; overflow: hidden; }
  .background { position: absolute; top: 0; left: 0; width: 100%; height: 100%; }
  .name {
    position: absolute; top: 44%; left: 0; width: 100%;
    text-align: center; font-family: "Helvetica", "Arial", sans-serif;
    font-size: 40pt; font-weight: bold; color: #1b1b1b;
  }
</style>
</head>
<body>
  <div class="page">
    <img class="background" src="{{template_img}}">
    <div class="name">{{name}}</div>
  </div>
</body>
</html>
"#;

/// Reads a template override from disk, or falls back to the built-in one.
pub fn load_template(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => Ok(std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read certificate template {}", path.display()))?),
        None => Ok(DEFAULT_CERTIFICATE_TEMPLATE.to_string()),
    }
}
