//! Best-effort credit compensation for failed orders.

use tracing::{error, info};

use crate::error::PipelineError;
use crate::order::{CreditAdjustment, PaymentSource};
use crate::store::OrderStore;

/// Restores the credit the user spent on a failed order.
///
/// Regular payments get one check back, daily payments get one daily credit
/// back, anything else is left alone. A persistence failure is logged and not
/// retried.
pub async fn refund(store: &dyn OrderStore, user_id: &str, payment_source: PaymentSource) {
    if let Err(e) = try_refund(store, user_id, payment_source).await {
        error!(user_id, error = %e, "Failed to refund credit");
    }
}

async fn try_refund(
    store: &dyn OrderStore,
    user_id: &str,
    payment_source: PaymentSource,
) -> Result<(), PipelineError> {
    let Some(adjustment) = CreditAdjustment::for_source(payment_source) else {
        return Ok(());
    };

    store
        .adjust_credits(user_id, adjustment)
        .await
        .map_err(|e| PipelineError::Refund(e.to_string()))?;

    match adjustment {
        CreditAdjustment::RestoreCheck => info!(user_id, "Refunded 1 check to user"),
        CreditAdjustment::RestoreDailyCredit => info!(user_id, "Refunded 1 daily credit to user"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::User;
    use crate::store::MemoryStore;

    async fn user_after_refund(source: PaymentSource) -> User {
        let store = MemoryStore::new();
        let mut user = User::new("u1");
        user.checks = 2;
        user.unlimited_settings.daily_credits_used_today = 3;
        store.put_user(user);

        refund(&store, "u1", source).await;
        store.user("u1").unwrap()
    }

    #[tokio::test]
    async fn regular_restores_a_check() {
        let user = user_after_refund(PaymentSource::Regular).await;
        assert_eq!(user.checks, 3);
        assert_eq!(user.unlimited_settings.daily_credits_used_today, 3);
    }

    #[tokio::test]
    async fn daily_restores_a_daily_credit() {
        let user = user_after_refund(PaymentSource::Daily).await;
        assert_eq!(user.checks, 2);
        assert_eq!(user.unlimited_settings.daily_credits_used_today, 2);
    }

    #[tokio::test]
    async fn other_sources_change_nothing() {
        let user = user_after_refund(PaymentSource::Other).await;
        assert_eq!(user.checks, 2);
        assert_eq!(user.unlimited_settings.daily_credits_used_today, 3);
    }

    #[tokio::test]
    async fn missing_user_is_reported_not_panicked() {
        let store = MemoryStore::new();
        let err = try_refund(&store, "ghost", PaymentSource::Regular)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Refund(_)));
        // The public entry point swallows it.
        refund(&store, "ghost", PaymentSource::Regular).await;
    }
}
