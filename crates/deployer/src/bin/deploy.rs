/// Deploys the SecureSwapDEX contract and prints its address.
///
/// The deployment is configured through `DEPLOYER_*` environment variables
/// (or a `.env` file). Without `DEPLOYER_ETHEREUM_URL`, a local anvil node is
/// spun up for the duration of the run. Logs go to stderr and are filtered
/// with `RUST_LOG`, so stdout only carries the deployed address.
use deployer::{
    artifacts::ArtifactStore,
    chain::Chain,
    config::DeployerConfig,
    deploy::{run, EthersFramework},
};
use eyre::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = DeployerConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Connect to the chain and get a client for the deployer.
    let chain = Chain::connect(config.ethereum_url.clone(), config.poll_interval()).await?;
    let client = chain.client(config.signer()?).await?;

    // Deploy the contract.
    let framework = EthersFramework::new(ArtifactStore::new(config.artifacts.clone()), client)
        .confirmations(config.confirmations)
        .poll_interval(config.poll_interval());
    run(&framework, &mut std::io::stdout()).await?;

    Ok(())
}
