//! Node seam used by the pipeline.

use async_trait::async_trait;
use extender_sdk::client::{ClientError, NodeClient};
use extender_sdk::objects::{AddressBalances, Block, CoinInfo, Event};

/// Queries the pipeline issues against the node.
///
/// Implementations own their request timeouts; callers never retry inline.
#[async_trait]
pub trait NodeApi: Send + Sync + 'static {
    async fn latest_height(&self) -> Result<u64, ClientError>;

    async fn block(&self, height: u64) -> Result<Block, ClientError>;

    async fn events(&self, height: u64) -> Result<Vec<Event>, ClientError>;

    /// Balances of `addresses` at `height`. Addresses are normalized.
    async fn address_balances(
        &self,
        addresses: &[String],
        height: u64,
    ) -> Result<Vec<AddressBalances>, ClientError>;

    async fn coin_info(&self, symbol: &str) -> Result<CoinInfo, ClientError>;
}

#[async_trait]
impl NodeApi for NodeClient {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        NodeClient::latest_height(self).await
    }

    async fn block(&self, height: u64) -> Result<Block, ClientError> {
        NodeClient::block(self, height).await
    }

    async fn events(&self, height: u64) -> Result<Vec<Event>, ClientError> {
        NodeClient::events(self, height).await
    }

    async fn address_balances(
        &self,
        addresses: &[String],
        height: u64,
    ) -> Result<Vec<AddressBalances>, ClientError> {
        NodeClient::address_balances(self, addresses, height).await
    }

    async fn coin_info(&self, symbol: &str) -> Result<CoinInfo, ClientError> {
        NodeClient::coin_info(self, symbol).await
    }
}
