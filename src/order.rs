//! Persisted order and user records.
//!
//! Field names follow the documents in the `orders` and `users` collections,
//! so an [`Order`] can be deserialized straight from a change event.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle status of an order. `Failed` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Failed,
    Completed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// How the user paid for the order; decides what a refund restores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSource {
    /// Paid with a consumable check credit.
    Regular,
    /// Paid from the daily allowance of an unlimited plan.
    Daily,
    /// Anything else. Refunds are a no-op.
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFile {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
}

/// Post-processed reports attached to a completed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminFiles {
    pub ai_report: FileRef,
    pub similarity_report: FileRef,
}

/// One user submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub payment_source: PaymentSource,
    #[serde(default)]
    pub user_file: UserFile,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_files: Option<AdminFiles>,
}

/// Terminal result written to an order exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Failed {
        reason: String,
    },
    Completed {
        ai_report_url: String,
        similarity_report_url: String,
    },
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Outcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn status(&self) -> OrderStatus {
        match self {
            Outcome::Failed { .. } => OrderStatus::Failed,
            Outcome::Completed { .. } => OrderStatus::Completed,
        }
    }
}

impl Order {
    /// A freshly inserted order as the storefront creates it.
    pub fn pending(
        id: impl Into<String>,
        user: impl Into<String>,
        payment_source: PaymentSource,
        file_url: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        Self {
            id: id.into(),
            file_name: Some(filename.clone()),
            user: Some(user.into()),
            payment_source,
            user_file: UserFile {
                url: file_url.into(),
                filename: Some(filename),
            },
            status: OrderStatus::Pending,
            failure_reason: None,
            admin_files: None,
        }
    }

    /// Name used for the storage object: the uploaded file's name, then the
    /// order's `fileName`, then `"file"`.
    pub fn upload_name(&self) -> &str {
        [self.user_file.filename.as_deref(), self.file_name.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or("file")
    }

    /// Moves a pending order into the terminal state described by `outcome`.
    /// Terminal orders are never touched again.
    pub fn apply(&mut self, outcome: &Outcome) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(self.id.clone()));
        }
        match outcome {
            Outcome::Failed { reason } => {
                self.failure_reason = Some(reason.clone());
                self.admin_files = None;
            }
            Outcome::Completed {
                ai_report_url,
                similarity_report_url,
            } => {
                self.failure_reason = None;
                self.admin_files = Some(AdminFiles {
                    ai_report: FileRef {
                        url: ai_report_url.clone(),
                    },
                    similarity_report: FileRef {
                        url: similarity_report_url.clone(),
                    },
                });
            }
        }
        self.status = outcome.status();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlimitedSettings {
    #[serde(default)]
    pub daily_credits_used_today: i64,
}

/// Credit balances owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub checks: i64,
    #[serde(default)]
    pub unlimited_settings: UnlimitedSettings,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            checks: 0,
            unlimited_settings: UnlimitedSettings::default(),
        }
    }

    pub fn apply(&mut self, adjustment: CreditAdjustment) {
        match adjustment {
            CreditAdjustment::RestoreCheck => self.checks += 1,
            CreditAdjustment::RestoreDailyCredit => {
                self.unlimited_settings.daily_credits_used_today -= 1
            }
        }
    }
}

/// Balance change applied by a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditAdjustment {
    /// `checks += 1`
    RestoreCheck,
    /// `unlimitedSettings.dailyCreditsUsedToday -= 1`
    RestoreDailyCredit,
}

impl CreditAdjustment {
    pub fn for_source(source: PaymentSource) -> Option<Self> {
        match source {
            PaymentSource::Regular => Some(CreditAdjustment::RestoreCheck),
            PaymentSource::Daily => Some(CreditAdjustment::RestoreDailyCredit),
            PaymentSource::Other => None,
        }
    }
}
