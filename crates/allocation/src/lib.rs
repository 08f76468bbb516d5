//! Lead distribution planning.
//!
//! [`DistributionRequest::from_wire`] validates what the operator submitted and
//! [`plan`] turns a request, the seller roster and the pool of candidate leads
//! into a [`DistributionPlan`]. Planning is pure; picking concrete leads and
//! writing assignments belongs to the server.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{Seller, SellerId, StrategyKind},
    error::{ApiError, ErrorCode},
    protocol::{
        BulkAssignRequest, CandidatePoolResponse, DistributionCriteria, DistributionPlan,
        PartialFulfillment, PlanAnnotation, PlanEntry, ProvinceCount, SellerShortfall,
    },
};
use thiserror::Error;
use tracing::debug;

pub mod split;

use split::{equal_split, truncate_in_order, weighted_split};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown distribution strategy '{0}'")]
    UnknownStrategy(String),
}

impl AllocationError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<AllocationError> for ApiError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::Validation(message) => ApiError::new(ErrorCode::Validation, message),
            AllocationError::UnknownStrategy(_) => {
                ApiError::new(ErrorCode::UnknownStrategy, value.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Equal,
    Regional,
    Performance,
    /// Operator-specified amounts, one per selected seller in selection order.
    Manual(Vec<u64>),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Equal => StrategyKind::Equal,
            Strategy::Regional => StrategyKind::Regional,
            Strategy::Performance => StrategyKind::Performance,
            Strategy::Manual(_) => StrategyKind::Manual,
        }
    }
}

/// A validated distribution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    pub strategy: Strategy,
    pub quantity: u64,
    pub seller_ids: Vec<SellerId>,
    pub criteria: DistributionCriteria,
}

impl DistributionRequest {
    pub fn from_wire(req: &BulkAssignRequest) -> Result<Self, AllocationError> {
        if req.user_ids.is_empty() {
            return Err(AllocationError::validation(
                "select at least one seller to distribute leads",
            ));
        }
        let mut seen = HashSet::with_capacity(req.user_ids.len());
        for id in &req.user_ids {
            if !seen.insert(*id) {
                return Err(AllocationError::validation(format!(
                    "seller {id} is selected more than once"
                )));
            }
        }

        let kind: StrategyKind = req
            .strategy
            .parse()
            .map_err(|_| AllocationError::UnknownStrategy(req.strategy.clone()))?;

        let (strategy, quantity) = match kind {
            StrategyKind::Equal => (Strategy::Equal, positive_quantity(req.quantity)?),
            StrategyKind::Regional => (Strategy::Regional, positive_quantity(req.quantity)?),
            StrategyKind::Performance => (Strategy::Performance, positive_quantity(req.quantity)?),
            StrategyKind::Manual => {
                let amounts = manual_amounts(req)?;
                let total = amounts
                    .iter()
                    .try_fold(0u64, |acc, n| acc.checked_add(*n))
                    .ok_or_else(|| AllocationError::validation("manual amounts are too large"))?;
                if total == 0 {
                    return Err(AllocationError::validation(
                        "manual distribution must assign at least one lead",
                    ));
                }
                if req.quantity > 0 && req.quantity as u64 != total {
                    return Err(AllocationError::validation(format!(
                        "manual amounts add up to {total} but quantity is {}",
                        req.quantity
                    )));
                }
                (Strategy::Manual(amounts), total)
            }
        };

        Ok(Self {
            strategy,
            quantity,
            seller_ids: req.user_ids.clone(),
            criteria: req.criteria.clone(),
        })
    }
}

fn positive_quantity(quantity: i64) -> Result<u64, AllocationError> {
    if quantity <= 0 {
        return Err(AllocationError::validation(
            "quantity must be greater than zero",
        ));
    }
    Ok(quantity as u64)
}

fn manual_amounts(req: &BulkAssignRequest) -> Result<Vec<u64>, AllocationError> {
    let selected: HashSet<SellerId> = req.user_ids.iter().copied().collect();
    let mut by_seller: HashMap<SellerId, u64> = HashMap::new();
    for entry in &req.manual {
        if !selected.contains(&entry.user_id) {
            return Err(AllocationError::validation(format!(
                "manual amount given for unselected seller {}",
                entry.user_id
            )));
        }
        if entry.quantity < 0 {
            return Err(AllocationError::validation(format!(
                "manual amount for seller {} must not be negative",
                entry.user_id
            )));
        }
        if by_seller.insert(entry.user_id, entry.quantity as u64).is_some() {
            return Err(AllocationError::validation(format!(
                "seller {} has more than one manual amount",
                entry.user_id
            )));
        }
    }
    Ok(req
        .user_ids
        .iter()
        .map(|id| by_seller.get(id).copied().unwrap_or(0))
        .collect())
}

/// What the allocator needs to know about a seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerProfile {
    pub id: SellerId,
    pub name: String,
    pub current_leads: u64,
    pub converted: u64,
    pub region: Option<String>,
    /// Overrides the conversion-derived score when set.
    pub score: Option<f64>,
}

impl SellerProfile {
    /// Conversion rate with add-one smoothing, so a seller with no history
    /// starts at 0.5 instead of 0 or undefined.
    pub fn performance_score(&self) -> f64 {
        self.score.unwrap_or_else(|| {
            (self.converted as f64 + 1.0) / (self.current_leads as f64 + 2.0)
        })
    }
}

impl From<&Seller> for SellerProfile {
    fn from(seller: &Seller) -> Self {
        Self {
            id: seller.id,
            name: seller.name.clone(),
            current_leads: seller.total_leads,
            converted: seller.total_converted,
            region: seller.region.clone(),
            score: None,
        }
    }
}

/// Leads matching a request's criteria, overall and per province.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePool {
    pub total: u64,
    pub by_region: Vec<ProvinceCount>,
}

impl CandidatePool {
    pub fn available_in(&self, region: &str) -> u64 {
        let region = region.trim();
        self.by_region
            .iter()
            .filter(|entry| entry.province.trim().eq_ignore_ascii_case(region))
            .map(|entry| entry.count)
            .sum()
    }
}

impl From<CandidatePoolResponse> for CandidatePool {
    fn from(value: CandidatePoolResponse) -> Self {
        Self {
            total: value.total,
            by_region: value.by_province,
        }
    }
}

/// Computes how many leads each selected seller receives.
///
/// Shares are computed on `min(quantity, pool.total)`; when that truncates the
/// request the plan carries a [`PartialFulfillment`] naming each seller's
/// planned and granted amounts.
pub fn plan(
    request: &DistributionRequest,
    roster: &[SellerProfile],
    pool: &CandidatePool,
) -> Result<DistributionPlan, AllocationError> {
    let sellers = resolve_sellers(request, roster)?;
    let available = pool.total;
    let effective = request.quantity.min(available);

    let (ideal, granted) = match &request.strategy {
        Strategy::Equal | Strategy::Regional => (
            equal_split(request.quantity, sellers.len()),
            equal_split(effective, sellers.len()),
        ),
        Strategy::Performance => {
            let weights: Vec<f64> = sellers.iter().map(|s| s.performance_score()).collect();
            (
                weighted_split(request.quantity, &weights),
                weighted_split(effective, &weights),
            )
        }
        Strategy::Manual(amounts) => (amounts.clone(), truncate_in_order(amounts, effective)),
    };

    let annotations = annotate(&request.strategy, &sellers, &granted, pool);

    let entries: Vec<PlanEntry> = sellers
        .iter()
        .zip(granted.iter())
        .zip(annotations)
        .map(|((seller, new_leads), annotation)| PlanEntry {
            user_id: seller.id,
            name: seller.name.clone(),
            current_leads: seller.current_leads,
            new_leads: *new_leads,
            total_after: seller.current_leads + new_leads,
            annotation,
        })
        .collect();

    let warning = (effective < request.quantity).then(|| PartialFulfillment {
        requested: request.quantity,
        available,
        shortfall: sellers
            .iter()
            .zip(ideal.iter().zip(granted.iter()))
            .filter(|(_, (planned, granted))| planned > granted)
            .map(|(seller, (planned, granted))| SellerShortfall {
                user_id: seller.id,
                planned: *planned,
                granted: *granted,
            })
            .collect(),
    });

    debug!(
        strategy = %request.strategy.kind(),
        requested = request.quantity,
        planned = effective,
        sellers = sellers.len(),
        truncated = warning.is_some(),
        "distribution planned"
    );

    Ok(DistributionPlan {
        strategy: request.strategy.kind(),
        requested: request.quantity,
        planned: effective,
        entries,
        warning,
    })
}

fn resolve_sellers<'a>(
    request: &DistributionRequest,
    roster: &'a [SellerProfile],
) -> Result<Vec<&'a SellerProfile>, AllocationError> {
    if request.seller_ids.is_empty() {
        return Err(AllocationError::validation(
            "select at least one seller to distribute leads",
        ));
    }
    request
        .seller_ids
        .iter()
        .map(|id| {
            roster
                .iter()
                .find(|profile| profile.id == *id)
                .ok_or_else(|| AllocationError::validation(format!("seller {id} not found")))
        })
        .collect()
}

fn annotate(
    strategy: &Strategy,
    sellers: &[&SellerProfile],
    granted: &[u64],
    pool: &CandidatePool,
) -> Vec<Option<PlanAnnotation>> {
    match strategy {
        Strategy::Equal | Strategy::Manual(_) => vec![None; sellers.len()],
        Strategy::Performance => sellers
            .iter()
            .map(|seller| {
                Some(PlanAnnotation::Performance {
                    score: seller.performance_score(),
                })
            })
            .collect(),
        Strategy::Regional => {
            let regional = regional_shares(sellers, granted, pool);
            sellers
                .iter()
                .zip(regional)
                .map(|(seller, regional_leads)| {
                    Some(PlanAnnotation::Region {
                        region: seller.region.clone(),
                        regional_leads,
                    })
                })
                .collect()
        }
    }
}

/// How much of each seller's share can come from their own region. Sellers in
/// the same region draw from one counter, in selection order; the rest of a
/// share falls back to the general pool.
pub fn regional_shares(
    sellers: &[&SellerProfile],
    granted: &[u64],
    pool: &CandidatePool,
) -> Vec<u64> {
    let mut remaining: HashMap<String, u64> = HashMap::new();
    sellers
        .iter()
        .zip(granted)
        .map(|(seller, share)| {
            let Some(region) = seller.region.as_deref().map(str::trim).filter(|r| !r.is_empty())
            else {
                return 0;
            };
            let left = remaining
                .entry(region.to_lowercase())
                .or_insert_with(|| pool.available_in(region));
            let take = (*share).min(*left);
            *left -= take;
            take
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
