use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::autocomplete::{self, MasterLookup};
use crate::config::Config;
use crate::downloader;
use crate::error::PortalError;
use crate::formula::Formula;
use crate::ingredient::ReviewData;
use crate::loader;
use crate::login::{self, AuthUser, ProfileCache, Role};
use crate::payment;
use crate::review;
use crate::store::{self, Store};
use crate::workflow;

const PROFILE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub profiles: ProfileCache,
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new(&config.data_dir)?;
    seed_admin(&store, &config);

    let state = Arc::new(AppState {
        store,
        config: config.clone(),
        profiles: ProfileCache::new(PROFILE_CACHE_TTL),
    });

    let protected = Router::new()
        .route("/api/me", get(login::get_profile))
        .route("/api/template", get(download_template))
        .route("/api/formulas", get(list_formulas).post(upload_formula))
        .route("/api/formulas/:id", get(get_formula).delete(delete_formula))
        .route("/api/formulas/:id/request-quote", post(request_quote))
        .route("/api/formulas/:id/quote", post(provide_quote))
        .route("/api/formulas/:id/pay", post(start_payment))
        .route("/api/formulas/:id/download", get(download_formula))
        .route("/api/formulas/:id/parse", get(parse_formula))
        .route(
            "/api/formulas/:id/review",
            get(get_review_data).put(save_review_draft),
        )
        .route("/api/formulas/:id/review/complete", post(complete_review))
        .route("/api/formulas/:id/review/send", post(send_review))
        .route("/api/formulas/:id/review/export", get(export_review_csv))
        .route("/api/formulas/:id/report", post(generate_report))
        .route("/api/master", get(master_summary).post(upload_master))
        .route("/api/master/:cas", get(lookup_master))
        .route_layer(middleware::from_fn(login::require_auth));

    let app = Router::new()
        .route("/api/signup", post(login::handle_signup))
        .route("/api/login", post(login::handle_login))
        .route("/api/logout", post(login::handle_logout))
        .route("/api/forgot-password", post(login::handle_forgot_password))
        .route("/api/reset-password", post(login::handle_reset_password))
        .route("/api/payments/success", get(payment_success))
        .route("/files/signed/:token", get(serve_signed_file))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("listening on http://0.0.0.0:{}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the configured admin account on first start, if any.
fn seed_admin(store: &Store, config: &Config) {
    let Some(seed) = &config.seed_admin else {
        return;
    };

    let mut parts = seed.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(username), Some(email), Some(password)) => {
            match login::register_user(store, username, email, password, Role::Admin) {
                Ok(()) => info!("seeded admin account {username}"),
                // Already registered on a previous start.
                Err(PortalError::Validation(_)) => {}
                Err(err) => warn!("failed to seed admin account: {err}"),
            }
        }
        _ => warn!("PORTAL_ADMIN_SEED must be username:email:password"),
    }
}

/// Customers only ever see the projected status, never the internal
/// review states or the admin-side timestamps.
fn customer_view_json(formula: &Formula) -> Value {
    let view = formula.status.customer_view();
    json!({
        "id": formula.id,
        "original_filename": formula.original_filename,
        "status": view,
        "status_label": view.label(),
        "quote_amount": formula.quote_amount,
        "quote_requested_at": formula.quote_requested_at,
        "created_at": formula.created_at,
        "updated_at": formula.updated_at,
    })
}

fn authorize_formula_access(user: &AuthUser, formula: &Formula) -> Result<(), PortalError> {
    if user.is_admin() || formula.customer_id == user.username {
        Ok(())
    } else {
        // Non-owners cannot learn that the formula exists.
        Err(PortalError::NotFound("Formula not found".to_string()))
    }
}

// ----- formula handlers -----

async fn upload_formula(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<Value>, PortalError> {
    let mut file_bytes = Vec::new();
    let mut original_filename = String::from("formula.xlsx");

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| PortalError::validation(loader::ERR_READ))?
    {
        if field.name() == Some("formula") {
            if let Some(name) = field.file_name() {
                original_filename = name.to_string();
            }
            file_bytes = field
                .bytes()
                .await
                .map_err(|_| PortalError::validation(loader::ERR_READ))?
                .to_vec();
        }
    }

    if file_bytes.is_empty() {
        return Err(PortalError::validation("No file data received"));
    }

    // Reject workbooks that will never parse, before storing anything.
    loader::parse_formula_workbook(&file_bytes)?;

    let stored = state.store.save_upload(&original_filename, &file_bytes)?;
    let formula = Formula::new(&user.username, &stored, &original_filename);
    state.store.insert_formula(&formula)?;

    info!("formula {} uploaded by {}", formula.id, user.username);
    Ok(Json(customer_view_json(&formula)))
}

async fn list_formulas(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, PortalError> {
    if user.is_admin() {
        let formulas = state.store.list_formulas()?;
        Ok(Json(json!({ "formulas": formulas })))
    } else {
        let formulas = state.store.list_formulas_for(&user.username)?;
        let projected: Vec<Value> = formulas.iter().map(customer_view_json).collect();
        Ok(Json(json!({ "formulas": projected })))
    }
}

async fn get_formula(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    let formula = state.store.get_formula(&id)?;
    authorize_formula_access(&user, &formula)?;

    if user.is_admin() {
        Ok(Json(json!(formula)))
    } else {
        Ok(Json(customer_view_json(&formula)))
    }
}

async fn delete_formula(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    workflow::delete_formula(&state.store, &user, &id)?;
    Ok(Json(json!({ "status": "deleted" })))
}

async fn request_quote(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    let formula = workflow::request_quote(&state.store, &user, &id)?;
    Ok(Json(customer_view_json(&formula)))
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    amount: f64,
}

async fn provide_quote(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<QuoteBody>,
) -> Result<Json<Value>, PortalError> {
    let formula = workflow::provide_quote(&state.store, &user, &id, body.amount)?;
    Ok(Json(json!(formula)))
}

async fn start_payment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    let formula = state.store.get_formula(&id)?;
    authorize_formula_access(&user, &formula)?;

    let redirect_url = payment::create_checkout(&state.config, &formula)?;
    Ok(Json(json!({ "redirect_url": redirect_url })))
}

#[derive(Debug, Deserialize)]
struct PaymentCallback {
    formula_id: String,
}

/// Success callback from the external checkout. Unauthenticated by
/// design; marking a quoted formula paid is idempotent.
async fn payment_success(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<PaymentCallback>,
) -> Result<Json<Value>, PortalError> {
    let formula = workflow::mark_paid(&state.store, &callback.formula_id)?;
    Ok(Json(customer_view_json(&formula)))
}

async fn download_formula(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    let formula = state.store.get_formula(&id)?;
    authorize_formula_access(&user, &formula)?;

    let path = state.store.upload_path(&formula.file_path);
    let ttl = Duration::from_secs(state.config.signed_url_ttl_secs);
    Ok(Json(json!({
        "url": store::create_signed_url(&path, ttl),
        "filename": formula.original_filename,
    })))
}

// ----- review handlers -----

/// Parse the stored upload and run auto-complete against the master
/// table. Returns the prefilled editor payload without persisting
/// anything; saving is an explicit follow-up action.
async fn parse_formula(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    login::require_admin(&user)?;

    let formula = state.store.get_formula(&id)?;
    let bytes = state.store.read_upload(&formula.file_path)?;
    let parsed = loader::parse_formula_workbook(&bytes)?;
    let ingredients = autocomplete::auto_complete(&state.store, parsed.ingredients);

    Ok(Json(json!({
        "product_name": parsed.product_name,
        "formula_number": parsed.formula_number,
        "ingredients": ingredients,
    })))
}

async fn get_review_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ReviewData>, PortalError> {
    login::require_admin(&user)?;
    Ok(Json(review::load_review_data(&state.store, &id)?))
}

async fn save_review_draft(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(data): Json<ReviewData>,
) -> Result<Json<Value>, PortalError> {
    let saved = review::save_draft(&state.store, &user, &id, data)?;
    Ok(Json(json!(saved)))
}

async fn complete_review(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(data): Json<ReviewData>,
) -> Result<Json<Value>, PortalError> {
    let saved = review::complete_review(&state.store, &user, &id, data)?;
    Ok(Json(json!(saved)))
}

async fn send_review(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    let (formula, saved) = review::send_to_client(&state.store, &user, &id)?;
    notify_customer(&state, &formula, &saved);
    Ok(Json(json!({ "status": formula.status })))
}

/// Email the customer that their report is ready. Mail problems are
/// logged and do not undo the send transition.
fn notify_customer(state: &AppState, formula: &Formula, saved: &review::Review) {
    let customer = match state.store.get_user(&formula.customer_id) {
        Ok(Some(user)) => user,
        _ => {
            warn!("formula {}: owner {} has no account, skipping notification", formula.id, formula.customer_id);
            return;
        }
    };

    let mailer = match crate::mailer::Mailer::from_config(&state.config) {
        Ok(mailer) => mailer,
        Err(err) => {
            warn!("mailer unavailable, skipping notification: {err}");
            return;
        }
    };

    let link = saved.report_path.as_deref().map(|name| {
        let ttl = Duration::from_secs(state.config.signed_url_ttl_secs);
        store::create_signed_url(&state.store.report_path(name), ttl)
    });

    if let Err(err) = mailer.send_report_ready(&customer.email, &saved.product_name, link.as_deref()) {
        warn!("failed to send report notification: {err}");
    }
}

async fn export_review_csv(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Response, PortalError> {
    login::require_admin(&user)?;

    let saved = state
        .store
        .get_review(&id)?
        .ok_or_else(|| PortalError::NotFound("No review has been saved for this formula".to_string()))?;

    let csv = downloader::to_csv(&saved);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"review-{id}.csv\""),
        )
        .body(axum::body::Body::from(csv))
        .unwrap())
}

async fn generate_report(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PortalError> {
    let report = review::generate_report(&state.store, &user, &id)?;
    let ttl = Duration::from_secs(state.config.signed_url_ttl_secs);

    Ok(Json(json!({
        "filename": report.filename,
        "url": store::create_signed_url(&report.path, ttl),
    })))
}

// ----- master table handlers -----

async fn upload_master(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<Value>, PortalError> {
    login::require_admin(&user)?;

    let mut file_bytes = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| PortalError::validation(loader::ERR_READ))?
    {
        if field.name() == Some("master") {
            file_bytes = field
                .bytes()
                .await
                .map_err(|_| PortalError::validation(loader::ERR_READ))?
                .to_vec();
        }
    }

    if file_bytes.is_empty() {
        return Err(PortalError::validation("No file data received"));
    }

    let records = loader::parse_master_workbook(&file_bytes)?;
    if records.is_empty() {
        return Err(PortalError::validation(
            "No master ingredient rows found in the uploaded file",
        ));
    }

    let stored = state.store.replace_master(&records)?;
    Ok(Json(json!({ "stored": stored })))
}

async fn master_summary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, PortalError> {
    login::require_admin(&user)?;
    Ok(Json(json!({ "count": state.store.master_count()? })))
}

async fn lookup_master(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(cas): Path<String>,
) -> Result<Json<Value>, PortalError> {
    login::require_admin(&user)?;

    let record = state
        .store
        .find_by_cas(&cas)?
        .ok_or_else(|| PortalError::NotFound("CAS number not found in the master table".to_string()))?;
    Ok(Json(json!(record)))
}

// ----- files -----

async fn download_template() -> Result<Response, PortalError> {
    let bytes = downloader::formula_template()
        .map_err(|e| PortalError::External(format!("Failed to build template: {e}").into()))?;

    Ok(xlsx_response("formula-template.xlsx", bytes))
}

async fn serve_signed_file(Path(token): Path<String>) -> Response {
    let Some(path) = store::resolve_signed_url(&token) else {
        return (StatusCode::NOT_FOUND, "Link is invalid or has expired").into_response();
    };

    let Ok(bytes) = std::fs::read(&path) else {
        return (StatusCode::NOT_FOUND, "File is no longer available").into_response();
    };

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download")
        .to_string();
    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("pdf") => "application/pdf",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(axum::body::Body::from(bytes))
        .unwrap()
}

fn xlsx_response(filename: &str, bytes: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        )
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(axum::body::Body::from(bytes))
        .unwrap()
}
