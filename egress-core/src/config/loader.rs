//! Settings file discovery and loading

use super::schema::Config;
use crate::error::{CoreError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Find the user settings file by checking environment and standard locations
    pub fn find_user_config(env_override: Option<&Path>) -> Option<PathBuf> {
        // 1. $EGRESS_CONFIG
        if let Some(path) = env_override {
            if path.exists() {
                return Some(path.to_path_buf());
            }
            tracing::warn!("Config file {:?} does not exist, ignoring", path);
        }

        // 2. $XDG_CONFIG_HOME/egress/config.toml
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            let p = PathBuf::from(xdg).join("egress/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        // 3. ~/.config/egress/config.toml
        if let Ok(home) = env::var("HOME") {
            let p = PathBuf::from(home).join(".config/egress/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        None
    }

    /// Load settings from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CoreError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load settings with fallback to built-in defaults
    /// Priority: Explicit path > $EGRESS_CONFIG > XDG/home config > defaults
    pub fn load_or_default(path: Option<&Path>, env_override: Option<&Path>) -> Result<Config> {
        if let Some(p) = path {
            return Self::load_from_file(p);
        }

        match Self::find_user_config(env_override) {
            Some(p) => {
                tracing::debug!("Loading config from {:?}", p);
                Self::load_from_file(&p)
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Config::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.firewall.enabled);
        assert_eq!(config.firewall.ports, vec![80, 443, 22]);
        assert_eq!(config.firewall.set_name, "allowed-domains");
        assert_eq!(config.gateway.upstream_host, "api.anthropic.com");
        assert_eq!(config.gateway.upstream_port, 443);
        assert!(config.proxy.require_allowlist);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[firewall]
allowlist = "/tmp/allow.txt"
provider_url = ""

[gateway]
timeout_secs = 30
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.firewall.allowlist, PathBuf::from("/tmp/allow.txt"));
        assert!(config.firewall.provider_url.is_empty());
        assert_eq!(config.firewall.chain, "EGRESS-ALLOW");
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(config.proxy.engine, "squid");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[gateway]\nsecret = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[proxy]\nengine = \"/usr/sbin/squid\"").unwrap();

        let config = ConfigLoader::load_or_default(Some(file.path()), None).unwrap();
        assert_eq!(config.proxy.engine, "/usr/sbin/squid");
    }

    #[test]
    fn test_env_override_used() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[firewall]\nenabled = false").unwrap();

        let config = ConfigLoader::load_or_default(None, Some(file.path())).unwrap();
        assert!(!config.firewall.enabled);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::load_or_default(Some(dir.path().join("missing.toml").as_path()), None);
        assert!(matches!(result, Err(CoreError::ConfigLoad { .. })));
    }
}
