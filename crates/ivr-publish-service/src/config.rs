//! Service configuration
//!
//! Loaded from a single JSON file. Every section is optional and falls back
//! to the defaults in [`crate::constants`].

use std::path::{Path, PathBuf};

use ivr_engine::CompilerOptions;
use manager_protocol::ManagerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::constants::{defaults, paths, timeouts};

/// How compiled dialplans reach the switch's config directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    /// Stage and rename through `sudo`, setting owner, group and mode
    #[default]
    Privileged,
    /// Write directly with the service's own permissions
    Local,
}

/// Deployment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub mode: DeployMode,
    /// Directory the switch reads generated dialplans from
    pub dialplan_dir: PathBuf,
    /// Where unprivileged temp files are written (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,
    pub owner: String,
    pub group: String,
    /// File mode, written as an octal string such as `"0440"`
    #[serde(with = "octal_mode")]
    pub file_mode: u32,
    /// Elevation helper
    pub sudo_path: String,
    /// Limit for each privileged command
    pub command_timeout_secs: u64,
}

impl DeployConfig {
    /// Resolved staging directory
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            mode: DeployMode::default(),
            dialplan_dir: PathBuf::from(paths::DIALPLAN_DIR),
            staging_dir: None,
            owner: defaults::OWNER.to_string(),
            group: defaults::GROUP.to_string(),
            file_mode: defaults::FILE_MODE,
            sudo_path: paths::SUDO.to_string(),
            command_timeout_secs: timeouts::COMMAND_SECS,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Manager interface connection
    pub manager: ManagerConfig,
    pub deploy: DeployConfig,
    pub compiler: CompilerOptions,
    /// Flow persistence directory; flows are kept in memory only if unset
    pub store_dir: Option<PathBuf>,
    /// JSON-lines file receiving every publish event
    pub audit_log: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from a JSON file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;
        let config: Self = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path).await,
            None => Ok(Self::default()),
        }
    }

    /// Save configuration as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(ConfigError::Io)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, contents).await.map_err(ConfigError::Io)?;
        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

/// File modes as octal strings (`"0440"`), also accepting plain numbers
mod octal_mode {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04o}", mode))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u32),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let mode = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(text) => {
                let digits = text.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8)
                    .map_err(|_| de::Error::custom(format!("invalid octal file mode '{}'", text)))?
            }
        };
        if mode > 0o7777 {
            return Err(de::Error::custom(format!("file mode {:o} out of range", mode)));
        }
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.deploy.mode, DeployMode::Privileged);
        assert_eq!(config.deploy.dialplan_dir, PathBuf::from("/etc/asterisk/ivr"));
        assert_eq!(config.deploy.owner, "asterisk");
        assert_eq!(config.deploy.file_mode, 0o440);
        assert_eq!(config.manager.port, 5038);
        assert_eq!(config.compiler.flow_variable, "IVR_FLOW_ID");
        assert!(config.store_dir.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "manager": {"host": "pbx.local", "username": "ivr", "secret": "x"},
            "deploy": {"mode": "local", "dialplanDir": "ignored", "file_mode": "0640"}
        }"#;
        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.manager.host, "pbx.local");
        assert_eq!(config.manager.port, 5038);
        assert_eq!(config.deploy.mode, DeployMode::Local);
        assert_eq!(config.deploy.file_mode, 0o640);
        // Unknown keys are ignored, the default stays.
        assert_eq!(config.deploy.dialplan_dir, PathBuf::from("/etc/asterisk/ivr"));
    }

    #[test]
    fn test_file_mode_forms() {
        let numeric: DeployConfig = serde_json::from_str(r#"{"file_mode": 288}"#).unwrap();
        assert_eq!(numeric.file_mode, 0o440);
        let prefixed: DeployConfig = serde_json::from_str(r#"{"file_mode": "0o600"}"#).unwrap();
        assert_eq!(prefixed.file_mode, 0o600);
        assert!(serde_json::from_str::<DeployConfig>(r#"{"file_mode": "rw-r"}"#).is_err());
        assert!(serde_json::from_str::<DeployConfig>(r#"{"file_mode": "77777"}"#).is_err());

        let json = serde_json::to_value(DeployConfig::default()).unwrap();
        assert_eq!(json["file_mode"], "0440");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("ivr.json");

        let mut config = ServiceConfig::default();
        config.store_dir = Some(temp_dir.path().join("flows"));
        config.deploy.mode = DeployMode::Local;
        config.save(&path).await.unwrap();

        let loaded = ServiceConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = ServiceConfig::load(&temp_dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(ServiceConfig::load_or_default(None).await.is_ok());
    }
}
