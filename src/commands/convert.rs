// src/commands/convert.rs
//! Local file conversion, no repository or object store involved

use anyhow::{bail, Context, Result};
use refstash::config::RefstashConfig;
use refstash::pipeline::{normalize, WorkingSet};
use refstash::sniff;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Normalize `input` to a JPEG 2000 at `output` with the configured recipes
pub fn cmd_convert(
    config: &RefstashConfig,
    input: &Path,
    output: &Path,
    mimetype: Option<String>,
) -> Result<()> {
    if !input.is_file() {
        bail!("Input file not found: {}", input.display());
    }

    let mimetype = match mimetype {
        Some(mimetype) => mimetype,
        None => {
            let detected = sniff::from_file(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            info!("Detected {} as {}", input.display(), detected);
            detected.to_string()
        }
    };

    let classifier = config.classifier()?;
    let classification = match classifier.classify(Some(&mimetype)) {
        Ok(classification) => classification,
        Err(rejection) => bail!("{}", rejection.message),
    };
    println!("{}", classification.message);
    println!("Recipe: {}", classification.recipe);

    let tools = config.tool_invoker()?;
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let working = WorkingSet::create(
        config.conversion.scratch_dir.as_deref(),
        &filename,
        Some(&mimetype),
    )?;

    let result = (|| -> Result<()> {
        fs::copy(input, working.source())
            .with_context(|| format!("Failed to copy {} to scratch", input.display()))?;
        let outcome = normalize(
            &tools,
            &classification.recipe,
            working.source(),
            working.artifact(),
            working.root(),
        );
        if !outcome.success {
            bail!("Conversion failed:\n{}", outcome.message);
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::copy(working.artifact(), output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("{}", outcome.message);
        Ok(())
    })();

    let scratch = working.root().to_path_buf();
    if let Err(e) = working.cleanup() {
        warn!("Failed to remove scratch directory {}: {}", scratch.display(), e);
    }
    result?;

    println!("Wrote {}", output.display());
    Ok(())
}
