use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::{ChangeFeed, OrderStore, OrderStream};
use crate::error::StoreError;
use crate::order::{CreditAdjustment, Order, Outcome, User};

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Collections {
    orders: HashMap<String, Order>,
    users: HashMap<String, User>,
}

/// In-process datastore with a broadcast insert feed.
///
/// Used by `reportflow serve` and by the tests. Feed failures can be injected
/// with [`MemoryStore::break_feed`], and subscriptions can be made to fail
/// with [`MemoryStore::fail_next_subscriptions`].
#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<Mutex<Collections>>,
    feed: broadcast::Sender<Result<Order, StoreError>>,
    failing_subscriptions: Arc<Mutex<u32>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            collections: Arc::new(Mutex::new(Collections::default())),
            feed,
            failing_subscriptions: Arc::new(Mutex::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_user(&self, user: User) {
        self.lock().users.insert(user.id.clone(), user);
    }

    /// Stores `order` and publishes it to every open subscription. An empty
    /// id is replaced by a fresh one. Returns the stored id.
    pub fn insert_order(&self, mut order: Order) -> String {
        if order.id.is_empty() {
            order.id = Uuid::new_v4().to_string();
        }
        let id = order.id.clone();
        self.lock().orders.insert(id.clone(), order.clone());
        // No receivers simply means nobody is listening right now.
        let _ = self.feed.send(Ok(order));
        id
    }

    /// Delivers an error to every open subscription.
    pub fn break_feed(&self, reason: impl Into<String>) {
        let _ = self.feed.send(Err(StoreError::Feed(reason.into())));
    }

    /// Makes the next `count` calls to [`ChangeFeed::subscribe`] fail.
    pub fn fail_next_subscriptions(&self, count: u32) {
        *self
            .failing_subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = count;
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.lock().orders.get(order_id).cloned()
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.lock().users.get(user_id).cloned()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn finalize(&self, order_id: &str, outcome: &Outcome) -> Result<Order, StoreError> {
        let mut collections = self.lock();
        let order = collections
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;
        order.apply(outcome)?;
        Ok(order.clone())
    }

    async fn adjust_credits(
        &self,
        user_id: &str,
        adjustment: CreditAdjustment,
    ) -> Result<(), StoreError> {
        let mut collections = self.lock();
        let user = collections
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;
        user.apply(adjustment);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self) -> Result<OrderStream, StoreError> {
        {
            let mut failing = self
                .failing_subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::Feed("subscription refused".into()));
            }
        }

        let stream = BroadcastStream::new(self.feed.subscribe()).map(|item| match item {
            Ok(event) => event,
            Err(lagged) => Err(StoreError::Feed(lagged.to_string())),
        });
        Ok(stream.boxed())
    }
}
