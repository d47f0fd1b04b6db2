//! Layered settings: defaults, settings file, `GANTRY_*` environment, command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use gantry_deploy::RpcOptions;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::Overrides;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub registry: Option<PathBuf>,
    pub suite: Option<PathBuf>,
    pub artifacts: PathBuf,
    pub rpc_url: Option<Url>,
    /// Only read from the environment or the settings file.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub confirmations: u64,
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub gas_multiplier_percent: u64,
    pub explorer_api_key: Option<String>,
    pub verify_after_deploy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let rpc = RpcOptions::default();
        Self {
            registry: None,
            suite: None,
            artifacts: PathBuf::from("artifacts"),
            rpc_url: None,
            private_key: None,
            confirmations: rpc.confirmations,
            receipt_timeout_secs: rpc.receipt_timeout.as_secs(),
            poll_interval_ms: rpc.poll_interval.as_millis() as u64,
            gas_multiplier_percent: rpc.gas_multiplier_percent,
            explorer_api_key: None,
            verify_after_deploy: false,
        }
    }
}

impl Settings {
    pub fn load(config: &Path, overrides: &Overrides) -> Result<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config))
            .merge(Env::prefixed("GANTRY_").ignore(&["verbosity", "config"]))
            .merge(Serialized::defaults(overrides))
            .extract()
            .context("Invalid settings")?;

        tracing::debug!(
            config = %config.display(),
            registry = ?settings.registry,
            suite = ?settings.suite,
            rpc_url = ?settings.rpc_url.as_ref().map(Url::as_str),
            "Settings loaded"
        );
        Ok(settings)
    }

    pub fn registry(&self) -> Result<&Path> {
        self.registry
            .as_deref()
            .context("No registry configured (--registry, GANTRY_REGISTRY or `registry` in the settings file)")
    }

    pub fn suite(&self) -> Result<&Path> {
        self.suite
            .as_deref()
            .context("No suite configured (--suite, GANTRY_SUITE or `suite` in the settings file)")
    }

    pub fn rpc_options(&self) -> RpcOptions {
        RpcOptions {
            confirmations: self.confirmations,
            receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            gas_multiplier_percent: self.gas_multiplier_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load(Path::new("missing.toml"), &Overrides::default())
                .map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.rpc_options(), RpcOptions::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_then_flags() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gantry.toml",
                r#"
                registry = "networks/base.toml"
                suite = "suites/gateway-send.toml"
                confirmations = 2
                gas_multiplier_percent = 150
                "#,
            )?;
            jail.set_env("GANTRY_CONFIRMATIONS", "3");
            jail.set_env("GANTRY_PRIVATE_KEY", "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80");
            jail.set_env("GANTRY_RPC_URL", "https://mainnet.base.org");

            let overrides = Overrides {
                suite: Some(PathBuf::from("suites/other.toml")),
                verify_after_deploy: true,
                ..Default::default()
            };
            let settings =
                Settings::load(Path::new("gantry.toml"), &overrides).map_err(|e| e.to_string())?;

            assert_eq!(settings.registry, Some(PathBuf::from("networks/base.toml")));
            assert_eq!(settings.suite, Some(PathBuf::from("suites/other.toml")));
            assert_eq!(settings.confirmations, 3);
            assert_eq!(settings.gas_multiplier_percent, 150);
            assert!(settings.verify_after_deploy);
            assert!(settings.private_key.is_some());
            assert_eq!(
                settings.rpc_url.as_ref().map(Url::as_str),
                Some("https://mainnet.base.org/")
            );
            Ok(())
        });
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("GANTRY_RPC_URL", "not a url");
            assert!(Settings::load(Path::new("gantry.toml"), &Overrides::default()).is_err());
            Ok(())
        });
    }
}
