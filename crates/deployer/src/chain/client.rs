use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    middleware::{
        gas_escalator::{Frequency, GeometricGasPrice},
        nonce_manager::NonceManagerError,
        GasEscalatorMiddleware, MiddlewareError, NonceManagerMiddleware, SignerMiddleware,
    },
    providers::{
        Http, HttpClientError, HttpRateLimitRetryPolicy, Middleware, PendingTransaction, Provider,
        RetryClient, RetryClientBuilder, RetryPolicy,
    },
    signers::Signer,
    types::{transaction::eip2718::TypedTransaction, Address, BlockId},
};
use eyre::Result;

const RATE_LIMIT_RETRIES: u32 = 10;
const TIMEOUT_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

// Pending transactions are repriced by 12.5% for every ten seconds they wait.
const GAS_PRICE_COEFFICIENT: f64 = 1.125;
const GAS_PRICE_EVERY_SECS: u64 = 10;

/// Nodes reject a creation transaction with this message when they estimated
/// its gas against a block that has since been replaced.
const INTRINSIC_GAS_ERROR: &str = "intrinsic gas too high";

#[derive(Debug, Default)]
struct DeployRetryPolicy {
    rate_limits: HttpRateLimitRetryPolicy,
}

impl RetryPolicy<HttpClientError> for DeployRetryPolicy {
    fn should_retry(&self, error: &HttpClientError) -> bool {
        self.rate_limits.should_retry(error) || error.to_string().contains(INTRINSIC_GAS_ERROR)
    }

    fn backoff_hint(&self, error: &HttpClientError) -> Option<Duration> {
        self.rate_limits.backoff_hint(error).or_else(|| {
            error
                .to_string()
                .contains(INTRINSIC_GAS_ERROR)
                .then_some(INITIAL_BACKOFF)
        })
    }
}

/// Wraps the HTTP transport of `provider` in a retrying client. The poll
/// interval of `provider` is kept.
fn retrying(provider: Provider<Http>) -> Provider<Arc<RetryClient<Http>>> {
    let interval = provider.get_interval();
    let transport = RetryClientBuilder::default()
        .rate_limit_retries(RATE_LIMIT_RETRIES)
        .timeout_retries(TIMEOUT_RETRIES)
        .initial_backoff(INITIAL_BACKOFF)
        .build(
            provider.as_ref().clone(),
            Box::<DeployRetryPolicy>::default(),
        );
    Provider::new(Arc::new(transport)).interval(interval)
}

type Transport = Arc<RetryClient<Http>>;

type Stack<S> =
    NonceManagerMiddleware<SignerMiddleware<GasEscalatorMiddleware<Provider<Transport>>, S>>;

/// The deployer's signing client. From the outside in, the stack is a nonce
/// manager, a signer bound to the node's chain id, a gas escalator and a
/// retrying HTTP transport.
#[derive(Debug)]
pub struct ChainClient<S: Signer + 'static> {
    stack: Stack<S>,
    deployer: Address,
}

impl<S: Signer + 'static> ChainClient<S> {
    pub async fn new(provider: Provider<Http>, signer: S) -> Result<Self> {
        let escalator = GasEscalatorMiddleware::new(
            retrying(provider),
            GeometricGasPrice::new(GAS_PRICE_COEFFICIENT, GAS_PRICE_EVERY_SECS, None::<u64>),
            Frequency::PerBlock,
        );
        let signing = SignerMiddleware::new_with_provider_chain(escalator, signer).await?;
        let deployer = signing.address();
        Ok(Self {
            stack: NonceManagerMiddleware::new(signing, deployer),
            deployer,
        })
    }

    /// The address of the deploying account.
    pub fn address(&self) -> Address {
        self.deployer
    }
}

#[async_trait]
impl<S: Signer + 'static> Middleware for ChainClient<S> {
    type Error = NonceManagerError<Self::Inner>;
    type Provider = Transport;
    type Inner = Stack<S>;

    fn inner(&self) -> &Self::Inner {
        &self.stack
    }

    // Only submission is overridden. Everything else falls through to the
    // stack through the trait's default methods.
    async fn send_transaction<T: Into<TypedTransaction> + Send + Sync>(
        &self,
        tx: T,
        block: Option<BlockId>,
    ) -> Result<PendingTransaction<'_, Self::Provider>, Self::Error> {
        self.stack
            .send_transaction(tx, block)
            .await
            .map_err(MiddlewareError::from_err)
    }
}
