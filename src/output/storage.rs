//! Run summary persistence
//!
//! Summaries are written as pretty JSON under the results directory.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::RunSummary;

const SUMMARY_PREFIX: &str = "testmux_";

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Save a run summary, returning the written path
pub fn save_summary(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;

    let path = dir.join(format!("{SUMMARY_PREFIX}{}.json", generate_run_id()));
    let file = File::create(&path).context("Failed to create summary file")?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, summary).context("Failed to write summary")?;

    info!("Saved run summary to {}", path.display());
    Ok(path)
}

pub fn load_summary(path: &Path) -> Result<RunSummary> {
    let file = File::open(path).context("Failed to open summary file")?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).context("Failed to parse summary")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleSummary;
    use tempfile::TempDir;

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert!(id.len() > 15);
        assert!(id.contains('_'));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("results");

        let mut summary = RunSummary::new(Utc::now());
        summary.exit_code = 1;
        let mut module = ModuleSummary::new("/out/Tests.dll");
        module.exit_code = Some(1);
        summary.modules.push(module);

        let path = save_summary(&dir, &summary).unwrap();
        assert!(path.starts_with(&dir));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SUMMARY_PREFIX) && n.ends_with(".json")));

        let loaded = load_summary(&path).unwrap();
        assert_eq!(loaded.exit_code, 1);
        assert_eq!(loaded.modules.len(), 1);
        assert_eq!(loaded.modules[0].module_path, "/out/Tests.dll");
    }
}
