use formula_portal::error::PortalError;
use formula_portal::formula::{CustomerStatus, Formula, FormulaStatus};
use formula_portal::login::{AuthUser, Role};
use formula_portal::store::Store;
use formula_portal::workflow;

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

// Test the full quote-and-pay lifecycle
fn test_lifecycle(store: &Store) {
    println!("\n====== Testing quote-and-pay lifecycle ======");

    let formula = Formula::new("alice", "f.xlsx", "day-cream.xlsx");
    store.insert_formula(&formula).unwrap();
    assert_eq!(formula.status, FormulaStatus::PendingReview);
    println!("✓ Formula created in pending_review");

    let f = workflow::request_quote(store, &customer(), &formula.id).unwrap();
    assert_eq!(f.status, FormulaStatus::QuoteRequested);
    assert!(f.quote_requested_at.is_some());
    println!("✓ Customer requested a quote");

    let f = workflow::provide_quote(store, &admin(), &formula.id, 150.0).unwrap();
    assert_eq!(f.status, FormulaStatus::QuoteProvided);
    assert_eq!(f.quote_amount, Some(150.0));
    println!("✓ Admin provided a quote of 150.00");

    let f = workflow::mark_paid(store, &formula.id).unwrap();
    assert_eq!(f.status, FormulaStatus::Paid);
    println!("✓ Payment marked the formula paid");

    // Paying again must not change anything.
    let again = workflow::mark_paid(store, &formula.id).unwrap();
    assert_eq!(again.status, FormulaStatus::Paid);
    assert_eq!(again.paid_at, f.paid_at);
    println!("✓ Repeated payment callback was a no-op");
}

// Test that guards reject bad input without touching the status
fn test_guards(store: &Store) {
    println!("\n====== Testing transition guards ======");

    let formula = Formula::new("alice", "f.xlsx", "serum.xlsx");
    store.insert_formula(&formula).unwrap();

    let err = workflow::provide_quote(store, &admin(), &formula.id, 0.0).unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)));
    let current = store.get_formula(&formula.id).unwrap();
    assert_eq!(current.status, FormulaStatus::PendingReview);
    assert!(current.quote_amount.is_none());
    println!("✓ Zero quote amount rejected, status unchanged");

    let err = workflow::mark_paid(store, &formula.id).unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)));
    println!("✓ Payment without a quote rejected");

    let err = workflow::provide_quote(store, &customer(), &formula.id, 100.0).unwrap_err();
    assert!(matches!(err, PortalError::Authorization(_)));
    println!("✓ Customer cannot provide a quote");
}

// Test that stale transitions surface as conflicts
fn test_conflicts(store: &Store) {
    println!("\n====== Testing conditional updates ======");

    let formula = Formula::new("alice", "f.xlsx", "lotion.xlsx");
    store.insert_formula(&formula).unwrap();

    workflow::request_quote(store, &customer(), &formula.id).unwrap();
    let err = workflow::request_quote(store, &customer(), &formula.id).unwrap_err();
    assert!(matches!(err, PortalError::Conflict(_)));
    println!("✓ Second quote request observed a conflict");
}

// Test the customer-facing status projection
fn test_projection() {
    println!("\n====== Testing customer status projection ======");

    assert_eq!(
        FormulaStatus::Paid.customer_view(),
        CustomerStatus::ReviewInProgress
    );
    assert_eq!(
        FormulaStatus::InReviewDraft.customer_view(),
        CustomerStatus::ReviewInProgress
    );
    assert_eq!(
        FormulaStatus::ReviewCompleted.customer_view(),
        CustomerStatus::ReviewInProgress
    );
    assert_eq!(
        FormulaStatus::SentToClient.customer_view(),
        CustomerStatus::Completed
    );
    println!("✓ Review states are indistinguishable from paid for customers");
}

fn main() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = Store::new(dir.path()).expect("Failed to open store");

    test_lifecycle(&store);
    test_guards(&store);
    test_conflicts(&store);
    test_projection();

    println!("\nAll workflow tests passed");
}
