//! Datastore seam: order/user persistence and the insert change feed.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::order::{CreditAdjustment, Order, Outcome};

/// Stream of newly inserted orders. An `Err` item means the subscription broke.
pub type OrderStream = BoxStream<'static, Result<Order, StoreError>>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes `outcome` to a pending order and returns the stored order after
    /// the update. Fails with [`StoreError::AlreadyFinalized`] when the order
    /// is no longer pending and with [`StoreError::OrderNotFound`] when it
    /// does not exist.
    async fn finalize(&self, order_id: &str, outcome: &Outcome) -> Result<Order, StoreError>;

    async fn adjust_credits(
        &self,
        user_id: &str,
        adjustment: CreditAdjustment,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription to order inserts. Dropping the stream closes it.
    async fn subscribe(&self) -> Result<OrderStream, StoreError>;
}
