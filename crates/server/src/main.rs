use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use server_api::{ApiContext, LoginThrottle};
use shared::{
    domain::{Lead, LeadId, Seller, UserId},
    error::ApiError,
    protocol::{
        BulkAssignRequest, BulkAssignResponse, CandidatePoolResponse, CreateSellerRequest,
        DistributionCriteria, DistributionPlan, ImportSummary, LeadListQuery, LeadPage,
        LeadStats, LoginRequest, LoginResponse, ProvinceCount, UpdateLeadRequest,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod error;

use auth::{ApiJson, AuthUser};
use config::{load_settings, prepare_database_url};
use error::HttpError;

pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) max_body_bytes: usize,
}

type HttpResult<T> = Result<T, HttpError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    match (
        settings.bootstrap_admin_username.as_deref(),
        settings.bootstrap_admin_password.as_deref(),
    ) {
        (Some(username), Some(password)) => {
            server_api::bootstrap_admin(&storage, username, password, settings.bcrypt_cost).await?;
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("bootstrap admin needs both username and password; skipping");
        }
        (None, None) => {}
    }

    let api = ApiContext {
        storage,
        auth: settings.auth_config(),
        login_throttle: Arc::new(LoginThrottle::new(
            settings.login_max_attempts,
            Duration::from_secs(settings.login_window_seconds),
        )),
    };
    let app = build_router(Arc::new(AppState {
        api,
        max_body_bytes: settings.max_import_bytes,
    }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/login", post(login))
        .route("/leads", get(list_leads))
        .route("/leads/stats", get(lead_stats))
        .route(
            "/leads/provinces-with-unassigned",
            get(provinces_with_unassigned),
        )
        .route("/leads/candidates", get(candidate_pool))
        .route("/leads/bulk-assign/preview", post(preview_distribution))
        .route("/leads/bulk-assign", post(execute_distribution))
        .route("/leads/import", post(import_leads))
        .route("/leads/:lead_id", put(update_lead))
        .route("/users/sellers", get(list_sellers).post(create_seller))
        .route("/users/:user_id/last-access", put(touch_last_access))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> HttpResult<Json<LoginResponse>> {
    Ok(Json(server_api::login(&state.api, &req).await?))
}

async fn list_leads(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Query(query): Query<LeadListQuery>,
) -> HttpResult<Json<LeadPage>> {
    Ok(Json(
        server_api::list_leads(&state.api, &principal, &query).await?,
    ))
}

async fn lead_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
) -> HttpResult<Json<LeadStats>> {
    Ok(Json(server_api::lead_stats(&state.api, &principal).await?))
}

async fn provinces_with_unassigned(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
) -> HttpResult<Json<Vec<ProvinceCount>>> {
    Ok(Json(
        server_api::provinces_with_unassigned(&state.api, &principal).await?,
    ))
}

async fn candidate_pool(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Query(criteria): Query<DistributionCriteria>,
) -> HttpResult<Json<CandidatePoolResponse>> {
    Ok(Json(
        server_api::candidate_pool(&state.api, &principal, &criteria).await?,
    ))
}

async fn preview_distribution(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    ApiJson(req): ApiJson<BulkAssignRequest>,
) -> HttpResult<Json<DistributionPlan>> {
    Ok(Json(
        server_api::preview_distribution(&state.api, &principal, &req).await?,
    ))
}

async fn execute_distribution(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    ApiJson(req): ApiJson<BulkAssignRequest>,
) -> HttpResult<Json<BulkAssignResponse>> {
    Ok(Json(
        server_api::execute_distribution(&state.api, &principal, &req, Utc::now()).await?,
    ))
}

async fn update_lead(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Path(lead_id): Path<i64>,
    ApiJson(update): ApiJson<UpdateLeadRequest>,
) -> HttpResult<Json<Lead>> {
    Ok(Json(
        server_api::update_lead(&state.api, &principal, LeadId(lead_id), &update).await?,
    ))
}

async fn import_leads(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    body: Bytes,
) -> HttpResult<Json<ImportSummary>> {
    if body.is_empty() {
        return Err(ApiError::validation("import body cannot be empty").into());
    }
    Ok(Json(
        server_api::import_leads(&state.api, &principal, &body).await?,
    ))
}

async fn list_sellers(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
) -> HttpResult<Json<Vec<Seller>>> {
    Ok(Json(server_api::list_sellers(&state.api, &principal).await?))
}

async fn create_seller(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    ApiJson(req): ApiJson<CreateSellerRequest>,
) -> HttpResult<(StatusCode, Json<Seller>)> {
    let seller = server_api::create_seller(&state.api, &principal, &req).await?;
    Ok((StatusCode::CREATED, Json(seller)))
}

async fn touch_last_access(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Path(user_id): Path<i64>,
) -> HttpResult<StatusCode> {
    server_api::touch_last_access(&state.api, &principal, UserId(user_id), Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
