mod client;

use std::{process::Stdio, sync::Arc, time::Duration};

pub use client::ChainClient;
use ethers::{
    core::utils::Anvil,
    providers::{Http, Middleware, Provider},
    signers::Signer,
    utils::AnvilInstance,
};
use eyre::{bail, Result, WrapErr};
use tokio::process::Command;
use tracing::{debug, info};

const ANVIL: &str = "anvil";

/// The network a deployment is sent to. This is either a remote node reached
/// over HTTP or a local anvil node that lives as long as the `Chain` does.
pub struct Chain {
    provider: Provider<Http>,
    client_version: String,
    _maybe_anvil: Option<AnvilInstance>,
}

impl Chain {
    /// Connects to the node at `maybe_rpc_url`. If no URL is given, a local
    /// anvil node is spun up instead.
    pub async fn connect(maybe_rpc_url: Option<String>, poll_interval: Duration) -> Result<Self> {
        let (rpc_url, maybe_anvil) = match maybe_rpc_url {
            Some(rpc_url) => (rpc_url, None),
            None => {
                // NOTE: `Anvil::spawn` panics when the binary is missing, so make
                // sure it can be launched first.
                check_anvil(ANVIL).await?;
                let anvil = Anvil::new().spawn();
                info!(endpoint = %anvil.endpoint(), "spawned local anvil node");
                (anvil.endpoint(), Some(anvil))
            }
        };

        let provider = Provider::<Http>::try_from(rpc_url.as_str())
            .wrap_err_with(|| format!("invalid ethereum rpc url {rpc_url}"))?
            .interval(poll_interval);

        // Asking for the client version makes an unreachable node fail here
        // rather than halfway through the deployment.
        let client_version = provider
            .client_version()
            .await
            .wrap_err_with(|| format!("failed to reach ethereum node at {rpc_url}"))?;
        debug!(%client_version, "connected to ethereum node");

        Ok(Self {
            provider,
            client_version,
            _maybe_anvil: maybe_anvil,
        })
    }

    /// A provider that can read from the chain.
    pub fn provider(&self) -> Provider<Http> {
        self.provider.clone()
    }

    /// A client that signs transactions with `signer`.
    pub async fn client<S: Signer + 'static>(&self, signer: S) -> Result<Arc<ChainClient<S>>> {
        Ok(Arc::new(ChainClient::new(self.provider(), signer).await?))
    }

    /// Checks to see if the underlying chain is an anvil chain.
    pub fn is_anvil(&self) -> bool {
        self.client_version.contains("anvil")
    }
}

/// Fails unless `program --version` runs successfully.
async fn check_anvil(program: &str) -> Result<()> {
    let status = Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .wrap_err("failed to spawn a local anvil node")?;
    if !status.success() {
        bail!(
            "failed to spawn a local anvil node: `{} --version` exited with {}",
            program,
            status
        );
    }
    Ok(())
}
