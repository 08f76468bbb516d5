use std::sync::Arc;

use allocation::{CandidatePool, DistributionRequest, SellerProfile};
use serde_json::Value;
use shared::{
    domain::Role,
    protocol::{BulkAssignRequest, BulkAssignResponse, DistributionPlan, LeadStats},
};
use tracing::{info, warn};

use crate::{
    error::ClientError,
    http::{ClientResult, CrmApi},
    session::AuthSession,
    store::{keys, StateContainer},
};

use super::{begin, settle};

/// Stats overview plus the distribute-leads form.
#[derive(Clone)]
pub struct DashboardView {
    api: Arc<dyn CrmApi>,
    store: StateContainer,
    session: AuthSession,
}

impl DashboardView {
    pub fn new(api: Arc<dyn CrmApi>, store: StateContainer, session: AuthSession) -> Self {
        Self {
            api,
            store,
            session,
        }
    }

    /// Admins also get the seller roster and the provinces that still have
    /// unassigned leads.
    pub async fn refresh(&self) -> ClientResult<LeadStats> {
        let principal = self.session.require_role(Role::Seller)?;
        begin(&self.store, keys::DASHBOARD_LOADING);
        let result = self.load(principal.role).await;
        settle(
            &self.store,
            keys::DASHBOARD_LOADING,
            keys::DASHBOARD_ERROR,
            result,
        )
    }

    async fn load(&self, role: Role) -> ClientResult<LeadStats> {
        let stats = self.api.lead_stats().await?;
        self.store.set_as(keys::DASHBOARD_STATS, &stats);
        if role == Role::Admin {
            let (sellers, provinces) = futures::try_join!(
                self.api.list_sellers(),
                self.api.provinces_with_unassigned()
            )?;
            self.store.set_as(keys::DASHBOARD_SELLERS, &sellers);
            self.store.set_as(keys::DASHBOARD_PROVINCES, &provinces);
        }
        Ok(stats)
    }

    /// Plans the distribution locally against the live roster and candidate
    /// pool. Invalid forms fail before anything is sent.
    pub async fn preview(&self, form: &BulkAssignRequest) -> ClientResult<DistributionPlan> {
        let request = self.validate(form)?;
        begin(&self.store, keys::DASHBOARD_LOADING);
        let result = self.plan(&request).await;
        let plan = settle(
            &self.store,
            keys::DASHBOARD_LOADING,
            keys::DASHBOARD_ERROR,
            result,
        )?;
        if let Some(warning) = &plan.warning {
            warn!(
                requested = warning.requested,
                available = warning.available,
                "not enough leads for the requested distribution"
            );
        }
        self.store.set_as(keys::DASHBOARD_PLAN, &plan);
        Ok(plan)
    }

    async fn plan(&self, request: &DistributionRequest) -> ClientResult<DistributionPlan> {
        let (sellers, pool) = futures::try_join!(
            self.api.list_sellers(),
            self.api.candidate_pool(&request.criteria)
        )?;
        self.store.set_as(keys::DASHBOARD_SELLERS, &sellers);
        let roster: Vec<SellerProfile> = sellers.iter().map(SellerProfile::from).collect();
        Ok(allocation::plan(request, &roster, &CandidatePool::from(pool))?)
    }

    /// Sends the bulk assignment, drops the preview and refreshes the stats.
    pub async fn execute(&self, form: &BulkAssignRequest) -> ClientResult<BulkAssignResponse> {
        self.validate(form)?;
        begin(&self.store, keys::DASHBOARD_LOADING);
        let result = self.api.execute_distribution(form).await;
        let response = settle(
            &self.store,
            keys::DASHBOARD_LOADING,
            keys::DASHBOARD_ERROR,
            result,
        )?;
        info!(
            assigned = response.assigned_count,
            partial = response.warning.is_some(),
            "leads distributed"
        );
        self.store
            .set_as(keys::DASHBOARD_LAST_ASSIGNMENT, &response);
        self.store.remove(keys::DASHBOARD_PLAN);

        if let Err(error) = self.refresh().await {
            warn!(%error, "stats refresh after distribution failed");
        }
        Ok(response)
    }

    pub fn current_plan(&self) -> Option<DistributionPlan> {
        self.store.get_as(keys::DASHBOARD_PLAN)
    }

    fn validate(&self, form: &BulkAssignRequest) -> ClientResult<DistributionRequest> {
        let checked = DistributionRequest::from_wire(form)
            .map_err(ClientError::from)
            .and_then(|request| {
                self.session.require_role(Role::Admin)?;
                Ok(request)
            });
        if let Err(err) = &checked {
            self.store
                .set(keys::DASHBOARD_ERROR, Value::String(err.to_string()));
        }
        checked
    }
}
