/// This module deploys a named contract in three steps. It resolves the
/// contract factory, submits the creation transaction and then waits for the
/// transaction to be confirmed. Each step runs exactly once.
use std::{io::Write, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    providers::{Middleware, PendingTransaction},
    types::{Address, Bytes, Eip1559TransactionRequest, TxHash, U64},
    utils::to_checksum,
};
use eyre::{bail, eyre, Result, WrapErr};
use tracing::{debug, info};

use crate::artifacts::{ArtifactStore, ContractFactory};

/// The contract this deployer ships.
pub const CONTRACT_NAME: &str = "SecureSwapDEX";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A creation transaction that has been submitted but not yet confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDeployment {
    pub name: String,
    pub tx_hash: TxHash,
}

/// A contract that has been confirmed on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedContract {
    pub name: String,
    pub address: Address,
    pub tx_hash: TxHash,
    pub block_number: Option<U64>,
}

/// The three steps of a deployment. Implementations own everything about
/// the network, the signer and the artifacts.
#[async_trait]
pub trait DeploymentFramework: Send + Sync {
    type Factory: Send;
    type Pending: Send;

    /// Resolves a factory for the named contract artifact.
    async fn contract_factory(&self, name: &str) -> Result<Self::Factory>;

    /// Submits the deployment transaction.
    async fn deploy(&self, factory: Self::Factory) -> Result<Self::Pending>;

    /// Waits until the deployment is confirmed.
    async fn deployed(&self, pending: Self::Pending) -> Result<DeployedContract>;
}

/// Deploys `name` once. Errors from the framework are returned as they are.
pub async fn deploy_contract<F: DeploymentFramework>(
    framework: &F,
    name: &str,
) -> Result<DeployedContract> {
    let factory = framework.contract_factory(name).await?;
    debug!(contract = name, "resolved contract factory");
    let pending = framework.deploy(factory).await?;
    debug!(contract = name, "submitted deployment transaction");
    let deployed = framework.deployed(pending).await?;
    info!(
        contract = name,
        address = ?deployed.address,
        tx_hash = ?deployed.tx_hash,
        "contract deployed"
    );
    Ok(deployed)
}

/// Deploys `SecureSwapDEX` and writes its address to `out`.
pub async fn run<F: DeploymentFramework, W: Write>(framework: &F, out: &mut W) -> Result<()> {
    let deployed = deploy_contract(framework, CONTRACT_NAME).await?;
    writeln!(
        out,
        "{} contract deployed to: {}",
        CONTRACT_NAME,
        to_checksum(&deployed.address, None)
    )?;
    Ok(())
}

/// Deploys contracts from an artifact directory through an ethers client.
pub struct EthersFramework<M> {
    artifacts: ArtifactStore,
    client: Arc<M>,
    confirmations: usize,
    poll_interval: Duration,
}

impl<M: Middleware> EthersFramework<M> {
    pub fn new(artifacts: ArtifactStore, client: Arc<M>) -> Self {
        Self {
            artifacts,
            client,
            confirmations: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// The number of blocks to wait for before a deployment counts as
    /// confirmed.
    pub fn confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    /// How often to poll the node for the deployment receipt.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// The data of a creation transaction for a contract whose constructor takes
/// no arguments.
pub fn creation_data(factory: &ContractFactory) -> Result<Bytes> {
    match factory.abi.constructor() {
        Some(constructor) if !constructor.inputs.is_empty() => bail!(
            "{} constructor expects {} arguments but none were given",
            factory.name,
            constructor.inputs.len()
        ),
        Some(constructor) => Ok(constructor
            .encode_input(factory.bytecode.to_vec(), &[])?
            .into()),
        None => Ok(factory.bytecode.clone()),
    }
}

#[async_trait]
impl<M> DeploymentFramework for EthersFramework<M>
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    type Factory = ContractFactory;
    type Pending = PendingDeployment;

    async fn contract_factory(&self, name: &str) -> Result<ContractFactory> {
        self.artifacts.contract_factory(name)
    }

    async fn deploy(&self, factory: ContractFactory) -> Result<PendingDeployment> {
        let tx = Eip1559TransactionRequest::new().data(creation_data(&factory)?);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .wrap_err_with(|| format!("failed to submit {} deployment", factory.name))?;
        let tx_hash = pending.tx_hash();
        info!(contract = %factory.name, ?tx_hash, "waiting for deployment to be confirmed");
        Ok(PendingDeployment {
            name: factory.name,
            tx_hash,
        })
    }

    async fn deployed(&self, pending: PendingDeployment) -> Result<DeployedContract> {
        let receipt = PendingTransaction::new(pending.tx_hash, self.client.provider())
            .interval(self.poll_interval)
            .confirmations(self.confirmations)
            .await?
            .ok_or_else(|| {
                eyre!(
                    "{} deployment transaction {:?} was dropped from the mempool",
                    pending.name,
                    pending.tx_hash
                )
            })?;

        if receipt.status == Some(U64::zero()) {
            bail!(
                "{} deployment transaction {:?} reverted",
                pending.name,
                pending.tx_hash
            );
        }
        let address = receipt.contract_address.ok_or_else(|| {
            eyre!(
                "{} deployment receipt {:?} has no contract address",
                pending.name,
                pending.tx_hash
            )
        })?;

        Ok(DeployedContract {
            name: pending.name,
            address,
            tx_hash: pending.tx_hash,
            block_number: receipt.block_number,
        })
    }
}
