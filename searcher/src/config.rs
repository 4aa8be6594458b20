use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use common_properties::finder::{DEFAULT_BATCH_SIZE, MAX_PERCENTAGE_THRESHOLD};
use humantime::parse_duration;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub case: CaseConfig,
    pub central_repository: Option<RepositoryConfig>,
    pub search: SearchConfig,
}

#[derive(Debug, Clone)]
pub struct CaseConfig {
    pub database_url: String,
    pub case_uuid: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub database_url: String,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub default_percentage_threshold: u32,
    pub batch_size: usize,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    case: RawCaseConfig,
    central_repository: Option<RawRepositoryConfig>,
    #[serde(default)]
    search: RawSearchConfig,
}

#[derive(Debug, Deserialize)]
struct RawCaseConfig {
    #[serde(default)]
    database_url: String,
    case_uuid: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepositoryConfig {
    #[serde(default)]
    database_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawSearchConfig {
    default_percentage_threshold: Option<u32>,
    batch_size: Option<usize>,
    max_connections: Option<u32>,
    acquire_timeout: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;

        let parsed: FileConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML {}", path.display()))?;

        Self::from_raw(parsed)
    }

    fn from_raw(raw: FileConfig) -> Result<Self> {
        let case_uuid = raw.case.case_uuid.trim().to_string();
        if case_uuid.is_empty() {
            bail!("case.case_uuid must not be empty");
        }
        let display_name = raw
            .case
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| case_uuid.clone());

        let acquire_timeout = parse_duration_string(
            raw.search.acquire_timeout.as_deref().unwrap_or("30s"),
            "search.acquire_timeout",
        )?;

        Ok(Self {
            case: CaseConfig {
                database_url: raw.case.database_url,
                case_uuid,
                display_name,
            },
            central_repository: raw.central_repository.map(|repo| RepositoryConfig {
                database_url: repo.database_url,
            }),
            search: SearchConfig {
                default_percentage_threshold: raw.search.default_percentage_threshold.unwrap_or(20),
                batch_size: raw.search.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                max_connections: raw.search.max_connections.unwrap_or(5),
                acquire_timeout,
            },
        })
    }

    /// Command line or environment values win over the file.
    pub fn apply_overrides(
        &mut self,
        case_database_url: Option<String>,
        central_repository_url: Option<String>,
    ) {
        if let Some(url) = case_database_url {
            self.case.database_url = url;
        }
        if let Some(url) = central_repository_url {
            self.central_repository = Some(RepositoryConfig { database_url: url });
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.case.database_url.trim().is_empty() {
            bail!("case.database_url must not be empty");
        }
        if let Some(repo) = &self.central_repository {
            if repo.database_url.trim().is_empty() {
                bail!("central_repository.database_url must not be empty");
            }
        }
        if self.search.default_percentage_threshold > MAX_PERCENTAGE_THRESHOLD {
            bail!(
                "search.default_percentage_threshold must be between 0 and {MAX_PERCENTAGE_THRESHOLD}, got {}",
                self.search.default_percentage_threshold
            );
        }
        if self.search.batch_size == 0 {
            bail!("search.batch_size must be greater than zero");
        }
        if self.search.max_connections == 0 {
            bail!("search.max_connections must be greater than zero");
        }

        Ok(())
    }
}

fn parse_duration_string(value: &str, field: &str) -> Result<Duration> {
    let duration = parse_duration(value)
        .with_context(|| format!("invalid duration for {field}: '{value}'"))?;

    if duration.is_zero() {
        return Err(anyhow!("duration for {field} must be greater than zero"));
    }

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
            [case]
            database_url = "postgres://localhost/case"
            case_uuid = "c-1"
        "#;
        let parsed: FileConfig = toml::from_str(raw).expect("parse config");
        let cfg = AppConfig::from_raw(parsed).expect("normalize");

        assert_eq!(cfg.case.display_name, "c-1");
        assert!(cfg.central_repository.is_none());
        assert_eq!(cfg.search.default_percentage_threshold, 20);
        assert_eq!(cfg.search.batch_size, 500);
        assert_eq!(cfg.search.acquire_timeout, Duration::from_secs(30));
        cfg.validate_config().expect("valid");
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [case]
            database_url = "postgres://localhost/case"
            case_uuid = "c-1"
            display_name = "Burglary 2024"

            [central_repository]
            database_url = "postgres://localhost/cr"

            [search]
            default_percentage_threshold = 0
            batch_size = 50
            max_connections = 2
            acquire_timeout = "2m"
        "#;
        let parsed: FileConfig = toml::from_str(raw).expect("parse config");
        let cfg = AppConfig::from_raw(parsed).expect("normalize");

        assert_eq!(cfg.case.display_name, "Burglary 2024");
        assert_eq!(
            cfg.central_repository.expect("repository").database_url,
            "postgres://localhost/cr"
        );
        assert_eq!(cfg.search.default_percentage_threshold, 0);
        assert_eq!(cfg.search.batch_size, 50);
        assert_eq!(cfg.search.acquire_timeout, Duration::from_secs(120));
    }

    #[test]
    fn rejects_empty_case_uuid() {
        let raw = r#"
            [case]
            database_url = "postgres://localhost/case"
            case_uuid = "  "
        "#;
        let parsed: FileConfig = toml::from_str(raw).expect("parse config");
        let err = AppConfig::from_raw(parsed).expect_err("should fail");
        assert!(err.to_string().contains("case.case_uuid"));
    }

    #[test]
    fn rejects_zero_duration() {
        let raw = r#"
            [case]
            database_url = "postgres://localhost/case"
            case_uuid = "c-1"

            [search]
            acquire_timeout = "0s"
        "#;
        let parsed: FileConfig = toml::from_str(raw).expect("parse config");
        let err = AppConfig::from_raw(parsed).expect_err("should fail");
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn rejects_threshold_above_hundred() {
        let raw = r#"
            [case]
            database_url = "postgres://localhost/case"
            case_uuid = "c-1"

            [search]
            default_percentage_threshold = 101
        "#;
        let parsed: FileConfig = toml::from_str(raw).expect("parse config");
        let cfg = AppConfig::from_raw(parsed).expect("normalize");
        let err = cfg.validate_config().expect_err("should fail");
        assert!(err.to_string().contains("default_percentage_threshold"));
    }

    #[test]
    fn url_can_come_from_overrides() {
        let raw = r#"
            [case]
            case_uuid = "c-1"
        "#;
        let parsed: FileConfig = toml::from_str(raw).expect("parse config");
        let mut cfg = AppConfig::from_raw(parsed).expect("normalize");
        assert!(cfg.validate_config().is_err());

        cfg.apply_overrides(
            Some("postgres://env/case".to_string()),
            Some("postgres://env/cr".to_string()),
        );
        cfg.validate_config().expect("valid");
        assert!(cfg.central_repository.is_some());
    }
}
