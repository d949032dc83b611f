//! Project settings and input loading shared by the subcommands.

use std::path::{Path, PathBuf};

use nodepix_core::Table;
use nodepix_recon::{build_evidence_table, EvidenceSource, ExportResult, ProjectConfig, ReconInput};

use crate::exit_codes::{recon_exit_code, EXIT_CONFIG, EXIT_IO};
use crate::scan::find_photos;
use crate::CliError;

const CONFIG_FILE: &str = "project.toml";

/// `--config`, else `<config dir>/nodepix/project.toml` if present, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<ProjectConfig, CliError> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };
    let Some(path) = path else {
        log::debug!("no project file, using defaults");
        return Ok(ProjectConfig::default());
    };

    let text = std::fs::read_to_string(&path).map_err(|e| {
        CliError::new(EXIT_IO, format!("cannot read config {}: {e}", path.display()))
    })?;
    let config = ProjectConfig::from_toml(&text).map_err(|e| {
        CliError::new(EXIT_CONFIG, format!("{}: {e}", path.display()))
    })?;
    log::info!("loaded config from {}", path.display());
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nodepix").join(CONFIG_FILE))
}

/// Load the events CSV, scan the pictures folder and run the reconciliation.
pub fn reconcile_inputs(
    config: &ProjectConfig,
    events: &Path,
    pictures: &Path,
) -> Result<ExportResult, CliError> {
    if !pictures.is_dir() {
        return Err(CliError::new(
            EXIT_IO,
            format!("pictures folder not found: {}", pictures.display()),
        )
        .with_hint("point --pictures at the folder holding the Deployment/ and Recovery/ directories"));
    }
    let events = nodepix_io::csv::load_events(events, &config.datetime_format)
        .map_err(|e| CliError::new(EXIT_IO, format!("cannot load events: {e}")))?;

    let scan = |source: EvidenceSource| -> Result<Table, CliError> {
        let files = find_photos(pictures, source).map_err(|e| CliError::new(EXIT_IO, e))?;
        Ok(build_evidence_table(&files, &config.layout, &config.filename))
    };
    let deployment = scan(EvidenceSource::Deployment)?;
    let recovery = scan(EvidenceSource::Recovery)?;
    if deployment.is_empty() && recovery.is_empty() {
        log::warn!("no Deployment or Recovery photos under {}", pictures.display());
    }

    let input = ReconInput {
        events,
        deployment,
        recovery,
    };
    nodepix_recon::run(config, &input).map_err(|e| CliError::new(recon_exit_code(&e), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.toml");
        std::fs::write(&path, "[quality]\ndrift_minutes = 5\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.quality.drift_minutes, 5);
    }

    #[test]
    fn invalid_config_exits_with_config_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.toml");
        std::fs::write(&path, "[layout.Date]\nstart = 3\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert_eq!(err.code, EXIT_CONFIG);
        assert!(err.message.contains("project.toml"));
    }

    #[test]
    fn missing_explicit_config_is_an_io_error() {
        let err = load_config(Some(Path::new("/nonexistent/project.toml"))).unwrap_err();
        assert_eq!(err.code, EXIT_IO);
    }
}
