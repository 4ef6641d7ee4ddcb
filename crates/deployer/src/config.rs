use std::{path::PathBuf, time::Duration};

use ethers::signers::{coins_bip39::English, LocalWallet, MnemonicBuilder};
use eyre::{bail, Result, WrapErr};
use serde::Deserialize;

/// Every setting is read from a `DEPLOYER_`-prefixed environment variable,
/// e.g. `DEPLOYER_ETHEREUM_URL`.
pub const ENV_PREFIX: &str = "DEPLOYER_";

/// The mnemonic that anvil and hardhat fund by default.
pub const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Settings for a deployment run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    // network configuration
    /// The node to deploy to. A local anvil node is spawned when unset.
    pub ethereum_url: Option<String>,
    pub poll_interval_ms: u64,
    pub confirmations: usize,
    // account configuration
    /// Takes precedence over the mnemonic.
    pub private_key: Option<String>,
    pub mnemonic: String,
    pub account_index: u32,
    // artifact configuration
    pub artifacts: PathBuf,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            // network configuration
            ethereum_url: None,
            poll_interval_ms: 250,
            confirmations: 1,
            // account configuration
            private_key: None,
            mnemonic: DEV_MNEMONIC.to_string(),
            account_index: 0,
            // artifact configuration
            artifacts: PathBuf::from("artifacts"),
        }
    }
}

impl DeployerConfig {
    /// Loads the configuration from the process environment. A `.env` file in
    /// the working directory is read first if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Loads the configuration from a set of key-value pairs. Keys without
    /// the `DEPLOYER_` prefix are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .wrap_err("invalid deployer configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirmations == 0 {
            bail!("{}CONFIRMATIONS must be at least 1", ENV_PREFIX);
        }
        if self.poll_interval_ms == 0 {
            bail!("{}POLL_INTERVAL_MS must be at least 1", ENV_PREFIX);
        }
        if self.mnemonic.trim().is_empty() && self.private_key.is_none() {
            bail!(
                "either {}PRIVATE_KEY or {}MNEMONIC must be set",
                ENV_PREFIX,
                ENV_PREFIX
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The wallet that signs the deployment.
    pub fn signer(&self) -> Result<LocalWallet> {
        match &self.private_key {
            Some(private_key) => private_key
                .trim()
                .parse::<LocalWallet>()
                .wrap_err_with(|| format!("{}PRIVATE_KEY is not a valid private key", ENV_PREFIX)),
            None => MnemonicBuilder::<English>::default()
                .phrase(self.mnemonic.as_str())
                .index(self.account_index)?
                .build()
                .wrap_err_with(|| {
                    format!(
                        "failed to derive account {} from {}MNEMONIC",
                        self.account_index, ENV_PREFIX
                    )
                }),
        }
    }
}
