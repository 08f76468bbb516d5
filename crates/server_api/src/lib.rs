use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Lead, LeadId, Principal, Role, Seller, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CandidatePoolResponse, CreateSellerRequest, DistributionCriteria, ImportSummary,
        LeadListQuery, LeadPage, LeadStats, LoginRequest, LoginResponse, ProvinceCount,
        UpdateLeadRequest,
    },
};
use storage::{LeadFilter, LeadSort, NewUser, SellerFilter, Storage};
use tracing::{info, warn};

pub mod auth;
pub mod distribution;
pub mod import;
pub mod throttle;

pub use auth::AuthConfig;
pub use distribution::{execute_distribution, preview_distribution};
pub use throttle::LoginThrottle;

use auth::{hash_password, issue_token, require_admin, verify_password, verify_token};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub auth: AuthConfig,
    pub login_throttle: Arc<LoginThrottle>,
}

pub async fn login(ctx: &ApiContext, req: &LoginRequest) -> Result<LoginResponse, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }
    if let Err(retry_after) = ctx.login_throttle.check(username, Instant::now()) {
        warn!(%username, retry_after, "login throttled");
        return Err(ApiError::rate_limited(retry_after));
    }

    let credentials = ctx
        .storage
        .find_credentials(username)
        .await
        .map_err(internal)?;
    let Some(credentials) = credentials.filter(|c| verify_password(&req.password, &c.password_hash))
    else {
        ctx.login_throttle.record_failure(username, Instant::now());
        return Err(ApiError::unauthorized("invalid username or password"));
    };

    ctx.login_throttle.reset(username);
    let token = issue_token(&ctx.auth, &credentials.principal, Utc::now())?;
    info!(user_id = %credentials.principal.id, role = credentials.principal.role.as_str(), "login");
    Ok(LoginResponse {
        success: true,
        token,
        user: credentials.principal,
    })
}

/// Resolves a bearer token to the user it was issued for. Tokens of deleted
/// users are rejected even while unexpired.
pub async fn authenticate(ctx: &ApiContext, token: &str) -> Result<Principal, ApiError> {
    let claims = verify_token(&ctx.auth, token)?;
    ctx.storage
        .get_principal(UserId(claims.sub))
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::unauthorized("session user no longer exists"))
}

pub async fn list_leads(
    ctx: &ApiContext,
    principal: &Principal,
    query: &LeadListQuery,
) -> Result<LeadPage, ApiError> {
    let seller = match principal.role {
        Role::Seller => SellerFilter::Seller(principal.id),
        Role::Admin => parse_seller_filter(query.seller.as_deref())?,
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let filter = LeadFilter {
        status: query.status,
        province: query.province.clone(),
        seller,
        search: query.search.clone(),
    };
    let sort = LeadSort {
        field: query.sort_by.unwrap_or_default(),
        direction: query.sort_direction.unwrap_or_default(),
    };

    let (leads, total) = ctx
        .storage
        .list_leads(&filter, page, limit, sort)
        .await
        .map_err(internal)?;
    Ok(LeadPage {
        leads,
        page,
        limit,
        total,
    })
}

fn parse_seller_filter(raw: Option<&str>) -> Result<SellerFilter, ApiError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(SellerFilter::Any),
        Some(value) if value.eq_ignore_ascii_case("unassigned") => Ok(SellerFilter::Unassigned),
        Some(value) => value
            .parse::<i64>()
            .map(|id| SellerFilter::Seller(UserId(id)))
            .map_err(|_| ApiError::validation(format!("invalid seller filter '{value}'"))),
    }
}

/// Admins see global counts, sellers only their own leads.
pub async fn lead_stats(ctx: &ApiContext, principal: &Principal) -> Result<LeadStats, ApiError> {
    let scope = (!principal.is_admin()).then_some(principal.id);
    ctx.storage.lead_stats(scope).await.map_err(internal)
}

pub async fn provinces_with_unassigned(
    ctx: &ApiContext,
    principal: &Principal,
) -> Result<Vec<ProvinceCount>, ApiError> {
    require_admin(principal)?;
    ctx.storage
        .provinces_with_unassigned()
        .await
        .map_err(internal)
}

pub async fn candidate_pool(
    ctx: &ApiContext,
    principal: &Principal,
    criteria: &DistributionCriteria,
) -> Result<CandidatePoolResponse, ApiError> {
    require_admin(principal)?;
    ctx.storage.candidate_pool(criteria).await.map_err(internal)
}

pub async fn update_lead(
    ctx: &ApiContext,
    principal: &Principal,
    lead_id: LeadId,
    update: &UpdateLeadRequest,
) -> Result<Lead, ApiError> {
    if update.is_empty() {
        return Err(ApiError::validation("nothing to update"));
    }
    let lead = ctx
        .storage
        .get_lead(lead_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("lead not found"))?;
    if !principal.is_admin() && lead.assigned_to != Some(principal.id) {
        return Err(ApiError::forbidden("lead is assigned to another seller"));
    }

    ctx.storage
        .update_lead(lead_id, update, Utc::now())
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("lead not found"))
}

pub async fn import_leads(
    ctx: &ApiContext,
    principal: &Principal,
    csv: &[u8],
) -> Result<ImportSummary, ApiError> {
    require_admin(principal)?;
    let parsed = import::parse_leads(csv)?;
    let (imported, duplicates) = ctx
        .storage
        .insert_leads(&parsed.leads)
        .await
        .map_err(internal)?;
    info!(
        imported,
        duplicates,
        rejected = parsed.errors.len(),
        "lead import finished"
    );
    Ok(ImportSummary {
        imported,
        duplicates,
        errors: parsed.errors,
    })
}

pub async fn list_sellers(ctx: &ApiContext, principal: &Principal) -> Result<Vec<Seller>, ApiError> {
    require_admin(principal)?;
    ctx.storage.list_sellers().await.map_err(internal)
}

pub async fn create_seller(
    ctx: &ApiContext,
    principal: &Principal,
    req: &CreateSellerRequest,
) -> Result<Seller, ApiError> {
    require_admin(principal)?;
    if req.username.trim().is_empty() || req.name.trim().is_empty() {
        return Err(ApiError::validation("username and name are required"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must have at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = hash_password(&req.password, ctx.auth.bcrypt_cost)?;
    let user = NewUser {
        username: req.username.clone(),
        name: req.name.clone(),
        password_hash,
        role: Role::Seller,
        region: req
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
    };
    let id = ctx
        .storage
        .create_user(&user)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Conflict, "username already taken"))?;
    info!(seller_id = %id, "seller created");

    ctx.storage
        .get_seller(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "created seller vanished"))
}

/// Users may stamp their own access time; admins may stamp anyone's.
pub async fn touch_last_access(
    ctx: &ApiContext,
    principal: &Principal,
    user_id: UserId,
    at: DateTime<Utc>,
) -> Result<(), ApiError> {
    if !principal.is_admin() && principal.id != user_id {
        return Err(ApiError::forbidden("cannot update another user's access time"));
    }
    let touched = ctx
        .storage
        .touch_last_access(user_id, at)
        .await
        .map_err(internal)?;
    if touched {
        Ok(())
    } else {
        Err(ApiError::not_found("user not found"))
    }
}

/// Creates the first admin account when the database has none. Returns
/// whether an account was created.
pub async fn bootstrap_admin(
    storage: &Storage,
    username: &str,
    password: &str,
    bcrypt_cost: u32,
) -> anyhow::Result<bool> {
    if storage.count_admins().await? > 0 {
        return Ok(false);
    }
    let password_hash =
        hash_password(password, bcrypt_cost).map_err(|e| anyhow::anyhow!(e.message))?;
    let created = storage
        .create_user(&NewUser {
            username: username.to_string(),
            name: username.to_string(),
            password_hash,
            role: Role::Admin,
            region: None,
        })
        .await?;
    if created.is_some() {
        info!(%username, "bootstrap admin created");
    }
    Ok(created.is_some())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
