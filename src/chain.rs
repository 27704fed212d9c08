use async_trait::async_trait;
use bitcoin::Block;

/// Source of confirmed chain data (full node, indexer, header store).
///
/// The collaborator is trusted for block order and height accuracy, and must
/// hand over txids/outpoints in the `bitcoin` crate's canonical byte order.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current best height.
    async fn tip_height(&self) -> anyhow::Result<u32>;

    /// Full block at an exact height, transactions in canonical block order.
    async fn block_at_height(&self, height: u32) -> anyhow::Result<Block>;
}
