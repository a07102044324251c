//! Verifier configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults below. Command-line flags override individual fields afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::solver::{ProverConfig, Solver};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Per-goal prover time limit
    pub timeout_secs: u64,

    /// Provers raced on every goal
    pub provers: Vec<ProverConfig>,

    /// Stop at the first goal that is not proved
    pub halt_on_first_error: bool,

    /// Check goals on the rayon thread pool
    pub parallel: bool,

    /// Directory receiving the rendered theory of every goal
    pub emit_dir: Option<PathBuf>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            provers: ProverConfig::defaults(),
            halt_on_first_error: false,
            parallel: true,
            emit_dir: None,
        }
    }
}

impl VerifierConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn solver(&self) -> Solver {
        Solver::new(self.provers.clone(), self.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Dialect;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.parallel);
        assert_eq!(config.provers.len(), 2);
        assert_eq!(config.provers[0].dialect, Dialect::Dfg);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timeout_secs": 5, "halt_on_first_error": true}}"#).unwrap();
        let config = VerifierConfig::load(file.path()).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert!(config.halt_on_first_error);
        assert!(config.parallel);
        assert_eq!(config.provers, ProverConfig::defaults());
    }

    #[test]
    fn test_custom_prover() {
        let json = r#"{"provers": [{"name": "vampire", "program": "vampire", "dialect": "smtlib"}]}"#;
        let config: VerifierConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.provers.len(), 1);
        assert!(config.provers[0].args.is_empty());
        assert_eq!(config.provers[0].dialect, Dialect::SmtLib);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = VerifierConfig::load(Path::new("/nonexistent/dsverify.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
