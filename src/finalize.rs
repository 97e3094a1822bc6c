use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::order::{Order, Outcome};
use crate::refund::refund;
use crate::store::OrderStore;

/// Writes the terminal state of an order and refunds the owner if it failed.
///
/// The refund uses the stored order returned by the update, not any snapshot
/// the caller holds. Nothing is refunded when the order was already terminal,
/// so a failed order is compensated at most once. Returns the updated order
/// when this call performed the transition.
pub async fn finalize_order(
    store: &dyn OrderStore,
    order_id: &str,
    outcome: &Outcome,
) -> Option<Order> {
    let updated = match store.finalize(order_id, outcome).await {
        Ok(order) => order,
        Err(StoreError::AlreadyFinalized(_)) => {
            warn!(order_id, "Order already finalized, skipping update");
            return None;
        }
        Err(e) => {
            error!(order_id, error = %e, "Failed to update order");
            return None;
        }
    };

    info!(order_id, status = ?updated.status, "Order finalized");

    if outcome.is_failure() {
        match updated.user.as_deref() {
            Some(user_id) => refund(store, user_id, updated.payment_source).await,
            None => warn!(order_id, "Failed order has no user, nothing to refund"),
        }
    }

    Some(updated)
}
