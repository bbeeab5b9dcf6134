//! Check command: parse the manifest and summarise its units.

use std::path::PathBuf;

use crate::config::Settings;
use crate::manifest::{ConfigUnit, load_manifest, resolve};

pub async fn run_check(settings: &Settings) -> anyhow::Result<()> {
    let root = settings.resolved_root();
    let path: PathBuf = resolve(&root, &settings.manifest_path.to_string_lossy());
    let (resolved, units) = load_manifest(&path, &root).await?;

    println!("Manifest: {}", resolved.display());
    for unit in &units {
        println!("  {}", summary(unit));
    }
    println!("{} unit(s) OK", units.len());
    Ok(())
}

fn summary(unit: &ConfigUnit) -> String {
    format!(
        "{}: {} file(s), {} data source(s), {} template(s), {} dependency(ies), {} custom{}",
        unit.label(),
        unit.files.len(),
        unit.file_data_sources.len() + unit.other_data_sources.len(),
        unit.templates.len(),
        unit.dependencies.len(),
        unit.custom.len(),
        if unit.watch { ", watch" } else { "" }
    )
}
