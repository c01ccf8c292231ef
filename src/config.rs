use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Portal credentials stored on disk, for binaries embedding this library.
///
/// Example TOML:
/// username = "name@example.com"
/// password = "..."
///
/// The library itself never touches this file; [`crate::VeoliaClient`] takes
/// the pair directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Load credentials from disk.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;

        let creds: Credentials = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials file: {}", path.display()))?;

        Ok(creds)
    }

    /// Path to the credentials file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("fr", "veolia-api", "veolia-api")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("credentials.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_roundtrip_through_toml() {
        let creds = Credentials {
            username: "name@example.com".to_string(),
            password: "secret".to_string(),
        };
        let serialized = toml::to_string_pretty(&creds).unwrap();
        let parsed: Credentials = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.username, creds.username);
        assert_eq!(parsed.password, creds.password);
    }

    #[test]
    fn config_file_path_ends_with_credentials_toml() {
        let path = Credentials::config_file_path().unwrap();
        assert!(path.ends_with("credentials.toml"));
    }
}
