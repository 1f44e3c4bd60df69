use chrono::Utc;
use log::info;

use crate::error::PortalError;
use crate::formula::{Formula, FormulaStatus};
use crate::login::{require_admin, AuthUser};
use crate::store::Store;

/// Customer requests a quote for a pending formula.
///
/// Only the owning customer may request; the formula must still be in
/// `pending_review`. A second concurrent request observes a conflict.
pub fn request_quote(store: &Store, actor: &AuthUser, formula_id: &str) -> Result<Formula, PortalError> {
    let formula = store.get_formula(formula_id)?;
    if formula.customer_id != actor.username && !actor.is_admin() {
        return Err(PortalError::Authorization(
            "Only the owner of a formula can request a quote".to_string(),
        ));
    }

    let updated = store.update_formula_if(formula_id, &[FormulaStatus::PendingReview], |f| {
        f.status = FormulaStatus::QuoteRequested;
        f.quote_requested_at = Some(Utc::now());
        Ok(())
    })?;

    info!("formula {formula_id}: quote requested");
    Ok(updated)
}

/// Admin provides a quote.
///
/// Normally follows a customer request, but an admin may quote a
/// formula that is still `pending_review`. The amount must be positive.
pub fn provide_quote(
    store: &Store,
    actor: &AuthUser,
    formula_id: &str,
    amount: f64,
) -> Result<Formula, PortalError> {
    require_admin(actor)?;

    if !amount.is_finite() || amount <= 0.0 {
        return Err(PortalError::validation(
            "Quote amount must be greater than zero",
        ));
    }

    let updated = store.update_formula_if(
        formula_id,
        &[FormulaStatus::PendingReview, FormulaStatus::QuoteRequested],
        |f| {
            f.status = FormulaStatus::QuoteProvided;
            f.quote_amount = Some(amount);
            Ok(())
        },
    )?;

    info!("formula {formula_id}: quote provided at {amount:.2}");
    Ok(updated)
}

/// Mark a formula paid, on return from the payment flow.
///
/// Requires a provided quote. Paying an already-paid formula is a
/// stable no-op so a repeated payment callback cannot double-apply.
pub fn mark_paid(store: &Store, formula_id: &str) -> Result<Formula, PortalError> {
    let current = store.get_formula(formula_id)?;
    if current.status == FormulaStatus::Paid {
        return Ok(current);
    }
    if current.quote_amount.is_none() {
        return Err(PortalError::validation(
            "No quote has been provided for this formula",
        ));
    }

    let result = store.update_formula_if(formula_id, &[FormulaStatus::QuoteProvided], |f| {
        f.status = FormulaStatus::Paid;
        f.paid_at = Some(Utc::now());
        Ok(())
    });

    match result {
        Ok(updated) => {
            info!("formula {formula_id}: payment processed");
            Ok(updated)
        }
        // A racing callback may have landed first; payment is settled
        // either way.
        Err(PortalError::Conflict(msg)) => {
            let again = store.get_formula(formula_id)?;
            if again.status == FormulaStatus::Paid {
                Ok(again)
            } else {
                Err(PortalError::Conflict(msg))
            }
        }
        Err(err) => Err(err),
    }
}

/// Admin deletes a formula from any state.
pub fn delete_formula(store: &Store, actor: &AuthUser, formula_id: &str) -> Result<(), PortalError> {
    require_admin(actor)?;
    store.delete_formula(formula_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::Role;
    use tempfile::tempdir;

    fn admin() -> AuthUser {
        AuthUser {
            username: "root".to_string(),
            role: Role::Admin,
        }
    }

    fn customer(name: &str) -> AuthUser {
        AuthUser {
            username: name.to_string(),
            role: Role::Customer,
        }
    }

    fn store_with_formula() -> (tempfile::TempDir, Store, Formula) {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let formula = Formula::new("alice", "f.xlsx", "cream.xlsx");
        store.insert_formula(&formula).unwrap();
        (dir, store, formula)
    }

    #[test]
    fn happy_path_through_payment() {
        let (_dir, store, formula) = store_with_formula();

        let f = request_quote(&store, &customer("alice"), &formula.id).unwrap();
        assert_eq!(f.status, FormulaStatus::QuoteRequested);
        assert!(f.quote_requested_at.is_some());

        let f = provide_quote(&store, &admin(), &formula.id, 150.0).unwrap();
        assert_eq!(f.status, FormulaStatus::QuoteProvided);
        assert_eq!(f.quote_amount, Some(150.0));

        let f = mark_paid(&store, &formula.id).unwrap();
        assert_eq!(f.status, FormulaStatus::Paid);
        assert!(f.paid_at.is_some());
    }

    #[test]
    fn request_quote_is_owner_only() {
        let (_dir, store, formula) = store_with_formula();

        let err = request_quote(&store, &customer("mallory"), &formula.id).unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));

        let current = store.get_formula(&formula.id).unwrap();
        assert_eq!(current.status, FormulaStatus::PendingReview);
    }

    #[test]
    fn repeated_quote_request_conflicts() {
        let (_dir, store, formula) = store_with_formula();

        request_quote(&store, &customer("alice"), &formula.id).unwrap();
        let err = request_quote(&store, &customer("alice"), &formula.id).unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[test]
    fn quote_must_be_positive() {
        let (_dir, store, formula) = store_with_formula();
        request_quote(&store, &customer("alice"), &formula.id).unwrap();

        for bad in [0.0, -10.0, f64::NAN] {
            let err = provide_quote(&store, &admin(), &formula.id, bad).unwrap_err();
            assert!(matches!(err, PortalError::Validation(_)));
        }

        // Guard failures never move the status.
        let current = store.get_formula(&formula.id).unwrap();
        assert_eq!(current.status, FormulaStatus::QuoteRequested);
        assert!(current.quote_amount.is_none());
    }

    #[test]
    fn admin_may_quote_before_the_customer_asks() {
        let (_dir, store, formula) = store_with_formula();

        let f = provide_quote(&store, &admin(), &formula.id, 75.0).unwrap();
        assert_eq!(f.status, FormulaStatus::QuoteProvided);
    }

    #[test]
    fn provide_quote_requires_admin() {
        let (_dir, store, formula) = store_with_formula();

        let err = provide_quote(&store, &customer("alice"), &formula.id, 75.0).unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));
    }

    #[test]
    fn pay_without_quote_is_rejected() {
        let (_dir, store, formula) = store_with_formula();

        let err = mark_paid(&store, &formula.id).unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[test]
    fn pay_is_idempotent() {
        let (_dir, store, formula) = store_with_formula();
        provide_quote(&store, &admin(), &formula.id, 150.0).unwrap();

        let first = mark_paid(&store, &formula.id).unwrap();
        assert_eq!(first.status, FormulaStatus::Paid);
        let paid_at = first.paid_at;

        let second = mark_paid(&store, &formula.id).unwrap();
        assert_eq!(second.status, FormulaStatus::Paid);
        assert_eq!(second.paid_at, paid_at);
    }

    #[test]
    fn delete_requires_admin_and_removes_the_record() {
        let (_dir, store, formula) = store_with_formula();

        let err = delete_formula(&store, &customer("alice"), &formula.id).unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));

        delete_formula(&store, &admin(), &formula.id).unwrap();
        assert!(matches!(
            store.get_formula(&formula.id),
            Err(PortalError::NotFound(_))
        ));
    }
}
