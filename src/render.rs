//! Renders the listing website from its templates.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;
use upon::Engine;

use crate::runtime::Runtime;
use crate::view::{FormattedPackage, ListingInfo};

/// Templates rendered into the output directory; every other file in the
/// website directory is copied as-is.
pub const TEMPLATES: [&str; 2] = ["index.html", "app.js"];

/// Values the website templates can refer to.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext<'a> {
    pub listing_info: &'a ListingInfo,
    pub packages: &'a [FormattedPackage],
}

/// What [`render_website`] wrote.
#[derive(Debug, Default, PartialEq)]
pub struct WebsiteReport {
    pub rendered: usize,
    pub copied: usize,
    /// Static files left alone because the output already had them.
    pub kept: usize,
}

pub fn render_template(source: &str, context: &RenderContext<'_>) -> Result<String> {
    let engine = Engine::new();
    let template = engine
        .compile(source)
        .context("Failed to compile website template")?;
    template
        .render(&engine, context)
        .to_string()
        .context("Failed to render website template")
}

/// Render the templates in `website_dir` into `output_dir` and copy the
/// remaining files without overwriting anything already there.
#[tracing::instrument(skip(runtime, context))]
pub fn render_website<R: Runtime>(
    runtime: &R,
    website_dir: &Path,
    output_dir: &Path,
    context: &RenderContext<'_>,
) -> Result<WebsiteReport> {
    let mut report = WebsiteReport::default();

    for name in TEMPLATES {
        let source_path = website_dir.join(name);
        if !runtime.exists(&source_path) {
            warn!("No {} template in {}", name, website_dir.display());
            continue;
        }

        let source = runtime.read_to_string(&source_path)?;
        let rendered = render_template(&source, context)
            .with_context(|| format!("Failed to render {}", source_path.display()))?;
        runtime.write(&output_dir.join(name), rendered.as_bytes())?;
        debug!("Rendered {}", name);
        report.rendered += 1;
    }

    copy_static_files(runtime, website_dir, website_dir, output_dir, &mut report)?;

    info!(
        "Website: {} rendered, {} copied, {} already present",
        report.rendered, report.copied, report.kept
    );
    Ok(report)
}

fn copy_static_files<R: Runtime>(
    runtime: &R,
    root: &Path,
    dir: &Path,
    output_dir: &Path,
    report: &mut WebsiteReport,
) -> Result<()> {
    for path in runtime.read_dir(dir)? {
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;

        if runtime.is_dir(&path) {
            copy_static_files(runtime, root, &path, output_dir, report)?;
            continue;
        }

        if TEMPLATES.iter().any(|t| relative == Path::new(t)) {
            continue;
        }

        let target = output_dir.join(relative);
        if runtime.exists(&target) {
            debug!("Keeping existing {}", target.display());
            report.kept += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            runtime.create_dir_all(parent)?;
        }
        runtime.write(&target, &runtime.read(&path)?)?;
        report.copied += 1;
    }

    Ok(())
}
