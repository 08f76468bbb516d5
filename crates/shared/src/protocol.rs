use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Lead, LeadStatus, Principal, SellerId, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: Principal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeadSortField {
    Name,
    Status,
    Province,
    #[default]
    CreatedAt,
    AssignedAt,
    LastContact,
    NextAction,
}

impl LeadSortField {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadSortField::Name => "name",
            LeadSortField::Status => "status",
            LeadSortField::Province => "province",
            LeadSortField::CreatedAt => "createdAt",
            LeadSortField::AssignedAt => "assignedAt",
            LeadSortField::LastContact => "lastContact",
            LeadSortField::NextAction => "nextAction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Query string of `GET /leads`. `seller` is either a seller id or the literal
/// `unassigned`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<LeadSortField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadPage {
    pub leads: Vec<Lead>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl LeadPage {
    pub fn total_pages(&self) -> u32 {
        if self.limit == 0 {
            return 0;
        }
        let pages = self.total.div_ceil(u64::from(self.limit));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadStats {
    pub total: u64,
    pub new: u64,
    pub contacted: u64,
    pub converted: u64,
    pub unassigned: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvinceCount {
    #[serde(rename = "_id")]
    pub province: String,
    pub count: u64,
}

fn default_unassigned_only() -> bool {
    true
}

/// Which leads a distribution may draw from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default = "default_unassigned_only")]
    pub unassigned_only: bool,
}

impl Default for DistributionCriteria {
    fn default() -> Self {
        Self {
            status: None,
            province: None,
            unassigned_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePoolResponse {
    pub total: u64,
    pub by_province: Vec<ProvinceCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAmount {
    pub user_id: SellerId,
    pub quantity: i64,
}

/// Body of `POST /leads/bulk-assign` and its preview. `strategy` stays a raw
/// tag so an unknown value surfaces as an `unknown_strategy` error instead of
/// a body-decoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAssignRequest {
    pub strategy: String,
    #[serde(default)]
    pub quantity: i64,
    pub user_ids: Vec<SellerId>,
    #[serde(default)]
    pub criteria: DistributionCriteria,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual: Vec<ManualAmount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanAnnotation {
    #[serde(rename_all = "camelCase")]
    Region {
        region: Option<String>,
        regional_leads: u64,
    },
    #[serde(rename_all = "camelCase")]
    Performance { score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub user_id: SellerId,
    pub name: String,
    pub current_leads: u64,
    pub new_leads: u64,
    pub total_after: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<PlanAnnotation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerShortfall {
    pub user_id: SellerId,
    pub planned: u64,
    pub granted: u64,
}

/// The plan could not be honoured in full because too few leads match the
/// criteria. Reported to the operator; never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialFulfillment {
    pub requested: u64,
    pub available: u64,
    pub shortfall: Vec<SellerShortfall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionPlan {
    pub strategy: StrategyKind,
    pub requested: u64,
    pub planned: u64,
    pub entries: Vec<PlanEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<PartialFulfillment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerAssignmentCount {
    pub user_id: SellerId,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAssignResponse {
    pub assigned_count: u64,
    pub per_seller: Vec<SellerAssignmentCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<PartialFulfillment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<DateTime<Utc>>,
}

impl UpdateLeadRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.notes.is_none() && self.next_action.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRowError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: u64,
    pub duplicates: u64,
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSellerRequest {
    pub username: String,
    pub name: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}
