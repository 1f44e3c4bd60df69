use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Internal lifecycle of a submitted formula, in strict forward order.
///
/// Transitions move one step forward at a time. The two exceptions are
/// providing a quote, which an admin may do before the customer has
/// requested one, and deletion, which is allowed from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaStatus {
    PendingReview,
    QuoteRequested,
    QuoteProvided,
    Paid,
    InReviewDraft,
    ReviewCompleted,
    /// Accepts the legacy synonym `completed` on input; the engine only
    /// ever writes `sent_to_client`.
    #[serde(alias = "completed")]
    SentToClient,
}

impl FormulaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaStatus::PendingReview => "pending_review",
            FormulaStatus::QuoteRequested => "quote_requested",
            FormulaStatus::QuoteProvided => "quote_provided",
            FormulaStatus::Paid => "paid",
            FormulaStatus::InReviewDraft => "in_review_draft",
            FormulaStatus::ReviewCompleted => "review_completed",
            FormulaStatus::SentToClient => "sent_to_client",
        }
    }

    /// Project the internal status onto what the customer is shown.
    ///
    /// The review states are indistinguishable from `paid` on the
    /// customer side: once payment lands, the customer sees
    /// "Review in Progress" until the report is sent. Every
    /// customer-facing view must go through this projection instead of
    /// re-deriving it.
    pub fn customer_view(&self) -> CustomerStatus {
        match self {
            FormulaStatus::PendingReview => CustomerStatus::PendingReview,
            FormulaStatus::QuoteRequested => CustomerStatus::QuoteRequested,
            FormulaStatus::QuoteProvided => CustomerStatus::QuoteProvided,
            FormulaStatus::Paid | FormulaStatus::InReviewDraft | FormulaStatus::ReviewCompleted => {
                CustomerStatus::ReviewInProgress
            }
            FormulaStatus::SentToClient => CustomerStatus::Completed,
        }
    }
}

impl fmt::Display for FormulaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer-facing projection of [`FormulaStatus`].
///
/// Serializes to the wire values the customer UI has always seen:
/// the three review states all surface as `paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerStatus {
    #[serde(rename = "pending_review")]
    PendingReview,
    #[serde(rename = "quote_requested")]
    QuoteRequested,
    #[serde(rename = "quote_provided")]
    QuoteProvided,
    #[serde(rename = "paid")]
    ReviewInProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl CustomerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CustomerStatus::PendingReview => "Pending Review",
            CustomerStatus::QuoteRequested => "Quote Requested",
            CustomerStatus::QuoteProvided => "Quote Provided",
            CustomerStatus::ReviewInProgress => "Review in Progress",
            CustomerStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A customer's submitted formula and its position in the review
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Unique identifier.
    pub id: String,

    /// Username of the owning customer.
    pub customer_id: String,

    /// Path of the stored upload, relative to the uploads directory.
    pub file_path: String,

    /// Filename as uploaded by the customer.
    pub original_filename: String,

    /// Current lifecycle state.
    pub status: FormulaStatus,

    /// Quoted price for the review, set when the quote is provided.
    pub quote_amount: Option<f64>,

    pub quote_requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub sent_to_client_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Formula {
    /// Create a fresh submission in `pending_review`.
    pub fn new(customer_id: &str, file_path: &str, original_filename: &str) -> Self {
        let now = Utc::now();
        Formula {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            file_path: file_path.to_string(),
            original_filename: original_filename.to_string(),
            status: FormulaStatus::PendingReview,
            quote_amount: None,
            quote_requested_at: None,
            paid_at: None,
            sent_to_client_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
