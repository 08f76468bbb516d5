use allocation::{CandidatePool, DistributionRequest, SellerProfile};
use chrono::{DateTime, Utc};
use shared::{
    domain::Principal,
    error::ApiError,
    protocol::{BulkAssignRequest, BulkAssignResponse, DistributionPlan, PlanAnnotation},
};
use storage::AssignmentQuota;
use tracing::{info, warn};

use crate::{auth::require_admin, internal, ApiContext};

pub async fn preview_distribution(
    ctx: &ApiContext,
    principal: &Principal,
    req: &BulkAssignRequest,
) -> Result<DistributionPlan, ApiError> {
    require_admin(principal)?;
    let request = DistributionRequest::from_wire(req)?;
    plan_against_storage(ctx, &request).await
}

/// Plans against the current pool and applies the plan in one transaction.
/// Regional plans ask storage for each seller's regional part first.
pub async fn execute_distribution(
    ctx: &ApiContext,
    principal: &Principal,
    req: &BulkAssignRequest,
    now: DateTime<Utc>,
) -> Result<BulkAssignResponse, ApiError> {
    require_admin(principal)?;
    let request = DistributionRequest::from_wire(req)?;
    let plan = plan_against_storage(ctx, &request).await?;

    let quotas: Vec<AssignmentQuota> = plan
        .entries
        .iter()
        .filter(|entry| entry.new_leads > 0)
        .map(|entry| {
            let (preferred_region, preferred) = match &entry.annotation {
                Some(PlanAnnotation::Region {
                    region,
                    regional_leads,
                }) => (region.clone(), *regional_leads),
                _ => (None, 0),
            };
            AssignmentQuota {
                seller: entry.user_id,
                count: entry.new_leads,
                preferred_region,
                preferred,
            }
        })
        .collect();

    let per_seller = ctx
        .storage
        .assign_quotas(&request.criteria, &quotas, now)
        .await
        .map_err(internal)?;
    let assigned_count: u64 = per_seller.iter().map(|entry| entry.count).sum();

    if assigned_count < plan.planned {
        warn!(
            planned = plan.planned,
            assigned = assigned_count,
            "fewer leads assigned than planned; pool changed during the run"
        );
    }
    info!(
        strategy = %plan.strategy,
        requested = plan.requested,
        assigned = assigned_count,
        sellers = per_seller.len(),
        "bulk assignment applied"
    );

    Ok(BulkAssignResponse {
        assigned_count,
        per_seller,
        warning: plan.warning,
    })
}

async fn plan_against_storage(
    ctx: &ApiContext,
    request: &DistributionRequest,
) -> Result<DistributionPlan, ApiError> {
    let roster: Vec<SellerProfile> = ctx
        .storage
        .list_sellers()
        .await
        .map_err(internal)?
        .iter()
        .map(SellerProfile::from)
        .collect();
    let pool: CandidatePool = ctx
        .storage
        .candidate_pool(&request.criteria)
        .await
        .map_err(internal)?
        .into();
    Ok(allocation::plan(request, &roster, &pool)?)
}
