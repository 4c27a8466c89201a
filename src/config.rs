//! Loads and validates everything the pipeline needs before any component is
//! constructed. A missing credential or a malformed hierarchy table is a
//! fatal startup error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::errors::ConfigError;
use crate::parameters::HierarchyTable;

const DEFAULT_BASE_URL: &str = "https://api.profile-search.example/v1/search";
const DEFAULT_OUTPUT_DIR: &str = "data/profile_search_results";
const DEFAULT_LEDGER_DIR: &str = "data/ledgers";
const DEFAULT_LEDGER_BASE_NAME: &str = "systematic_request_ledger";
const DEFAULT_FAILED_LOG_PATH: &str = "data/failed_requests.log";
const DEFAULT_HIERARCHY_FILE: &str = "config/hierarchy.json";

/// Everything the pipeline needs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub output_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub ledger_base_name: String,
    pub failed_request_log_path: PathBuf,
    pub hierarchy: Arc<HierarchyTable>,
}

impl Config {
    /// Loads from `.env` (if present) and the process environment, then
    /// reads and validates the hierarchy data file at `hierarchy_file_override`
    /// (falling back to `PROFILE_HIERARCHY_FILE`, then the built-in default).
    pub fn load(hierarchy_file_override: Option<&Path>) -> Result<Self, ConfigError> {
        // Missing .env is not an error; the environment may already be set.
        let _ = dotenvy::dotenv();

        let api_key = require_env("PROFILE_API_KEY")?;
        let base_url = std::env::var("PROFILE_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let output_dir = env_path("PROFILE_OUTPUT_DIR", DEFAULT_OUTPUT_DIR);
        let ledger_dir = env_path("PROFILE_LEDGER_DIR", DEFAULT_LEDGER_DIR);
        let ledger_base_name = std::env::var("PROFILE_LEDGER_BASE_NAME")
            .unwrap_or_else(|_| DEFAULT_LEDGER_BASE_NAME.to_string());
        let failed_request_log_path = env_path("PROFILE_FAILED_LOG_PATH", DEFAULT_FAILED_LOG_PATH);

        let hierarchy_path = hierarchy_file_override
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PROFILE_HIERARCHY_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HIERARCHY_FILE));

        let hierarchy = load_hierarchy(&hierarchy_path)?;

        info!(
            base_url = %base_url,
            output_dir = %output_dir.display(),
            ledger_dir = %ledger_dir.display(),
            hierarchy_file = %hierarchy_path.display(),
            layers = hierarchy.layers.len(),
            "config: loaded"
        );

        Ok(Self {
            api_key,
            base_url,
            output_dir,
            ledger_dir,
            ledger_base_name,
            failed_request_log_path,
            hierarchy: Arc::new(hierarchy),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv { name })
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn load_hierarchy(path: &Path) -> Result<HierarchyTable, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::HierarchyIo {
        path: path.display().to_string(),
        source,
    })?;
    let table: HierarchyTable =
        serde_json::from_str(&raw).map_err(|source| ConfigError::HierarchyParse {
            path: path.display().to_string(),
            source,
        })?;
    validate_hierarchy(&table)?;
    Ok(table)
}

fn validate_hierarchy(table: &HierarchyTable) -> Result<(), ConfigError> {
    if table.layers.is_empty() {
        return Err(ConfigError::HierarchyInvalid {
            message: "hierarchy must declare at least one layer".to_string(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for layer in &table.layers {
        if !seen.insert(layer.as_str()) {
            return Err(ConfigError::HierarchyInvalid {
                message: format!("layer `{layer}` is declared more than once"),
            });
        }
        if layer == crate::parameters::SKILL_SUBCATEGORIES_LAYER {
            continue; // resolved dynamically from skill_subcategories, not layer_values
        }
        if !table.layer_values.contains_key(layer) {
            return Err(ConfigError::HierarchyInvalid {
                message: format!("layer `{layer}` has no entry in layer_values"),
            });
        }
    }

    if table.static_country.is_empty() {
        return Err(ConfigError::HierarchyInvalid {
            message: "static_country clause must not be empty".to_string(),
        });
    }

    Ok(())
}
