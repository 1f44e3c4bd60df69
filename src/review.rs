use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::downloader;
use crate::error::PortalError;
use crate::formula::{Formula, FormulaStatus};
use crate::ingredient::{ensure_review_data_format, Ingredient, ReviewData};
use crate::login::{require_admin, AuthUser};
use crate::store::Store;

/// The admin's assessment of one formula. One review per formula,
/// keyed by the formula id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub formula_id: String,
    pub review_notes: String,
    pub product_name: String,
    pub formula_number: String,
    pub ingredients: Vec<Ingredient>,

    /// Filename of the generated report, once one exists.
    pub report_path: Option<String>,

    pub is_draft: bool,
    pub review_completed_at: Option<DateTime<Utc>>,
    pub sent_to_client_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    pub fn new(formula_id: &str, data: ReviewData, is_draft: bool) -> Self {
        let now = Utc::now();
        Review {
            formula_id: formula_id.to_string(),
            review_notes: data.review_notes,
            product_name: data.product_name,
            formula_number: data.formula_number,
            ingredients: data.ingredients,
            report_path: None,
            is_draft,
            review_completed_at: None,
            sent_to_client_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The editable payload of this review.
    pub fn data(&self) -> ReviewData {
        ReviewData {
            review_notes: self.review_notes.clone(),
            product_name: self.product_name.clone(),
            formula_number: self.formula_number.clone(),
            ingredients: self.ingredients.clone(),
        }
    }

    fn apply(&mut self, data: ReviewData) {
        self.review_notes = data.review_notes;
        self.product_name = data.product_name;
        self.formula_number = data.formula_number;
        self.ingredients = data.ingredients;
    }
}

/// A rendered report, stored on disk.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub filename: String,
    pub path: PathBuf,
}

/// Save the review as a draft. Admin only; the formula moves into
/// `in_review_draft` and stays there across repeated saves.
pub fn save_draft(
    store: &Store,
    actor: &AuthUser,
    formula_id: &str,
    data: ReviewData,
) -> Result<Review, PortalError> {
    require_admin(actor)?;

    store.update_formula_if(
        formula_id,
        &[FormulaStatus::Paid, FormulaStatus::InReviewDraft],
        |f| {
            f.status = FormulaStatus::InReviewDraft;
            Ok(())
        },
    )?;

    upsert(store, formula_id, data, true, |_| {})
}

/// Finalize the review. Admin only; requires at least one ingredient
/// row and non-empty notes, otherwise the formula status is untouched.
pub fn complete_review(
    store: &Store,
    actor: &AuthUser,
    formula_id: &str,
    data: ReviewData,
) -> Result<Review, PortalError> {
    require_admin(actor)?;

    if data.ingredients.is_empty() {
        return Err(PortalError::validation(
            "At least one ingredient row is required to complete a review",
        ));
    }
    if data.review_notes.trim().is_empty() {
        return Err(PortalError::validation(
            "Review notes are required to complete a review",
        ));
    }

    store.update_formula_if(
        formula_id,
        &[FormulaStatus::Paid, FormulaStatus::InReviewDraft],
        |f| {
            f.status = FormulaStatus::ReviewCompleted;
            Ok(())
        },
    )?;

    let now = Utc::now();
    let review = upsert(store, formula_id, data, false, |r| {
        r.review_completed_at = Some(now);
    })?;

    info!("formula {formula_id}: review completed");
    Ok(review)
}

/// Mark the completed review as sent. Stamps the send time on both the
/// review and the formula.
pub fn send_to_client(
    store: &Store,
    actor: &AuthUser,
    formula_id: &str,
) -> Result<(Formula, Review), PortalError> {
    require_admin(actor)?;

    let mut review = store
        .get_review(formula_id)?
        .ok_or_else(|| PortalError::validation("No review has been saved for this formula"))?;

    let now = Utc::now();
    let formula = store.update_formula_if(formula_id, &[FormulaStatus::ReviewCompleted], |f| {
        f.status = FormulaStatus::SentToClient;
        f.sent_to_client_at = Some(now);
        Ok(())
    })?;

    review.sent_to_client_at = Some(now);
    review.updated_at = now;
    store.upsert_review(&review)?;

    info!("formula {formula_id}: review sent to client");
    Ok((formula, review))
}

/// Render and store the PDF report for a completed review. Admin only.
///
/// The filename derives from the formula number (falling back to the
/// formula id) and the current date. Generating the report marks the
/// formula as sent, and re-generating after sending is allowed.
pub fn generate_report(
    store: &Store,
    actor: &AuthUser,
    formula_id: &str,
) -> Result<GeneratedReport, PortalError> {
    require_admin(actor)?;

    let formula = store.get_formula(formula_id)?;
    let mut review = store
        .get_review(formula_id)?
        .ok_or_else(|| PortalError::validation("No review has been saved for this formula"))?;

    let bytes = downloader::review_to_pdf(&formula, &review)
        .map_err(|e| PortalError::External(format!("Failed to render report: {e}").into()))?;
    let filename = downloader::report_filename(&formula, &review);
    let path = store.save_report(&filename, &bytes)?;

    let now = Utc::now();
    store.update_formula_if(
        formula_id,
        &[FormulaStatus::ReviewCompleted, FormulaStatus::SentToClient],
        |f| {
            f.status = FormulaStatus::SentToClient;
            if f.sent_to_client_at.is_none() {
                f.sent_to_client_at = Some(now);
            }
            Ok(())
        },
    )?;

    review.report_path = Some(filename.clone());
    if review.sent_to_client_at.is_none() {
        review.sent_to_client_at = Some(now);
    }
    review.updated_at = now;
    store.upsert_review(&review)?;

    info!("formula {formula_id}: report generated as {filename}");
    Ok(GeneratedReport { filename, path })
}

/// Load the stored review as a well-formed editor payload, whatever
/// shape the stored record is in.
pub fn load_review_data(store: &Store, formula_id: &str) -> Result<ReviewData, PortalError> {
    let raw = store
        .get_review(formula_id)?
        .and_then(|review| serde_json::to_value(review.data()).ok());
    Ok(ensure_review_data_format(raw))
}

fn upsert(
    store: &Store,
    formula_id: &str,
    data: ReviewData,
    is_draft: bool,
    finish: impl FnOnce(&mut Review),
) -> Result<Review, PortalError> {
    let mut review = store
        .get_review(formula_id)?
        .unwrap_or_else(|| Review::new(formula_id, ReviewData::default(), is_draft));

    review.apply(data);
    review.is_draft = is_draft;
    review.updated_at = Utc::now();
    finish(&mut review);

    store.upsert_review(&review)?;
    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingredient::Ingredient;
    use crate::login::Role;
    use tempfile::tempdir;

    fn admin() -> AuthUser {
        AuthUser {
            username: "root".to_string(),
            role: Role::Admin,
        }
    }

    fn customer() -> AuthUser {
        AuthUser {
            username: "alice".to_string(),
            role: Role::Customer,
        }
    }

    fn paid_formula(store: &Store) -> Formula {
        let mut formula = Formula::new("alice", "f.xlsx", "cream.xlsx");
        formula.status = FormulaStatus::Paid;
        formula.quote_amount = Some(150.0);
        store.insert_formula(&formula).unwrap();
        formula
    }

    fn review_data() -> ReviewData {
        ReviewData {
            review_notes: "All ingredients within limits.".to_string(),
            product_name: "Hydrating Day Cream".to_string(),
            formula_number: "HDC-042".to_string(),
            ingredients: vec![Ingredient::from_parsed("7732-18-5", "Aqua", "70")],
        }
    }

    #[test]
    fn save_draft_requires_admin() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);

        let err = save_draft(&store, &customer(), &formula.id, review_data()).unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));

        // Nothing was written.
        assert!(store.get_review(&formula.id).unwrap().is_none());
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::Paid
        );
    }

    #[test]
    fn draft_then_complete_flow() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);

        let review = save_draft(&store, &admin(), &formula.id, review_data()).unwrap();
        assert!(review.is_draft);
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::InReviewDraft
        );

        // Saving again is fine while drafting.
        save_draft(&store, &admin(), &formula.id, review_data()).unwrap();

        let review = complete_review(&store, &admin(), &formula.id, review_data()).unwrap();
        assert!(!review.is_draft);
        assert!(review.review_completed_at.is_some());
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::ReviewCompleted
        );
    }

    #[test]
    fn complete_straight_from_paid_is_allowed() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);

        complete_review(&store, &admin(), &formula.id, review_data()).unwrap();
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::ReviewCompleted
        );
    }

    #[test]
    fn complete_review_rejects_empty_ingredients() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);

        let mut data = review_data();
        data.ingredients.clear();

        let err = complete_review(&store, &admin(), &formula.id, data).unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::Paid
        );
    }

    #[test]
    fn complete_review_rejects_blank_notes() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);

        let mut data = review_data();
        data.review_notes = "   ".to_string();

        let err = complete_review(&store, &admin(), &formula.id, data).unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::Paid
        );
    }

    #[test]
    fn send_to_client_stamps_both_records() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);
        complete_review(&store, &admin(), &formula.id, review_data()).unwrap();

        let (formula, review) = send_to_client(&store, &admin(), &formula.id).unwrap();
        assert_eq!(formula.status, FormulaStatus::SentToClient);
        assert!(formula.sent_to_client_at.is_some());
        assert_eq!(review.sent_to_client_at, formula.sent_to_client_at);
    }

    #[test]
    fn send_before_completion_conflicts() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);
        save_draft(&store, &admin(), &formula.id, review_data()).unwrap();

        let err = send_to_client(&store, &admin(), &formula.id).unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[test]
    fn generate_report_writes_a_pdf_and_marks_sent() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);
        complete_review(&store, &admin(), &formula.id, review_data()).unwrap();

        let report = generate_report(&store, &admin(), &formula.id).unwrap();
        assert!(report.filename.starts_with("HDC-042-"));
        assert!(report.filename.ends_with(".pdf"));

        let bytes = std::fs::read(&report.path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));

        let review = store.get_review(&formula.id).unwrap().unwrap();
        assert_eq!(review.report_path, Some(report.filename.clone()));
        assert_eq!(
            store.get_formula(&formula.id).unwrap().status,
            FormulaStatus::SentToClient
        );

        // Re-generating after sending is allowed.
        generate_report(&store, &admin(), &formula.id).unwrap();
    }

    #[test]
    fn load_review_data_always_returns_a_complete_payload() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = paid_formula(&store);

        // No review yet: defaults with one placeholder row.
        let data = load_review_data(&store, &formula.id).unwrap();
        assert_eq!(data.review_notes, "");
        assert_eq!(data.ingredients.len(), 1);

        save_draft(&store, &admin(), &formula.id, review_data()).unwrap();
        let data = load_review_data(&store, &formula.id).unwrap();
        assert_eq!(data.product_name, "Hydrating Day Cream");
        assert_eq!(data.ingredients.len(), 1);
        assert_eq!(data.ingredients[0].inci_name, "Aqua");
    }
}
