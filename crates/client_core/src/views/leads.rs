use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde_json::Value;
use shared::{
    domain::{Lead, LeadId, LeadStatus},
    protocol::{LeadListQuery, LeadPage, LeadSortField, SortDirection, UpdateLeadRequest},
};
use tracing::debug;

use crate::{
    error::ClientError,
    http::{ClientResult, CrmApi},
    store::{keys, StateContainer},
};

use super::{begin, settle};

/// The filter half of a lead query. `seller` is a seller id or `unassigned`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilters {
    pub status: Option<LeadStatus>,
    pub province: Option<String>,
    pub seller: Option<String>,
    pub search: Option<String>,
}

/// Paginated lead table.
///
/// Every load bumps a generation counter; a response that comes back after a
/// newer load started is dropped, so the table always shows the most recently
/// requested query regardless of arrival order.
#[derive(Clone)]
pub struct LeadsView {
    api: Arc<dyn CrmApi>,
    store: StateContainer,
    page_size: u32,
    generation: Arc<AtomicU64>,
}

impl LeadsView {
    pub fn new(api: Arc<dyn CrmApi>, store: StateContainer, page_size: u32) -> Self {
        Self {
            api,
            store,
            page_size: page_size.max(1),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current_query(&self) -> LeadListQuery {
        self.store
            .get_as(keys::LEADS_QUERY)
            .unwrap_or_else(|| LeadListQuery {
                page: Some(1),
                limit: Some(self.page_size),
                ..LeadListQuery::default()
            })
    }

    pub fn current_page(&self) -> Option<LeadPage> {
        self.store.get_as(keys::LEADS_PAGE)
    }

    /// Returns `false` when a newer load superseded this one and its result
    /// was discarded.
    pub async fn load(&self, mut query: LeadListQuery) -> ClientResult<bool> {
        query.page = Some(query.page.unwrap_or(1).max(1));
        query.limit = Some(query.limit.unwrap_or(self.page_size));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.set_as(keys::LEADS_QUERY, &query);
        begin(&self.store, keys::LEADS_LOADING);

        let result = self.api.list_leads(&query).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding superseded lead page");
            return Ok(false);
        }

        let page = settle(&self.store, keys::LEADS_LOADING, keys::LEADS_ERROR, result)?;
        debug!(page = page.page, total = page.total, "lead page loaded");
        self.store.set_as(keys::LEADS_PAGE, &page);
        Ok(true)
    }

    pub async fn refresh(&self) -> ClientResult<bool> {
        self.load(self.current_query()).await
    }

    /// Replaces the filters and goes back to the first page.
    pub async fn set_filter(&self, filters: LeadFilters) -> ClientResult<bool> {
        let query = LeadListQuery {
            status: filters.status,
            province: non_blank(filters.province),
            seller: non_blank(filters.seller),
            search: non_blank(filters.search),
            page: Some(1),
            ..self.current_query()
        };
        self.load(query).await
    }

    /// No-op on the last page.
    pub async fn next_page(&self) -> ClientResult<bool> {
        let query = self.current_query();
        let current = query.page.unwrap_or(1);
        if let Some(page) = self.current_page() {
            if current >= page.total_pages() {
                return Ok(false);
            }
        }
        self.load(LeadListQuery {
            page: Some(current + 1),
            ..query
        })
        .await
    }

    /// No-op on the first page.
    pub async fn prev_page(&self) -> ClientResult<bool> {
        let query = self.current_query();
        let current = query.page.unwrap_or(1);
        if current <= 1 {
            return Ok(false);
        }
        self.load(LeadListQuery {
            page: Some(current - 1),
            ..query
        })
        .await
    }

    pub async fn goto_page(&self, page: u32) -> ClientResult<bool> {
        let last = self
            .current_page()
            .map(|p| p.total_pages().max(1))
            .unwrap_or(u32::MAX);
        if page == 0 || page > last {
            let err = ClientError::Validation(format!("page {page} is out of range 1..={last}"));
            self.store
                .set(keys::LEADS_ERROR, Value::String(err.to_string()));
            return Err(err);
        }
        self.load(LeadListQuery {
            page: Some(page),
            ..self.current_query()
        })
        .await
    }

    /// Sorting by the current column flips the direction; a new column starts
    /// ascending. Either way the table goes back to page one.
    pub async fn sort_by(&self, field: LeadSortField) -> ClientResult<bool> {
        let query = self.current_query();
        let direction = if query.sort_by == Some(field) {
            query.sort_direction.unwrap_or_default().toggled()
        } else {
            SortDirection::Asc
        };
        self.load(LeadListQuery {
            sort_by: Some(field),
            sort_direction: Some(direction),
            page: Some(1),
            ..query
        })
        .await
    }

    /// Saves the change and patches the lead into the visible page.
    pub async fn update_lead(&self, id: LeadId, update: UpdateLeadRequest) -> ClientResult<Lead> {
        if update.is_empty() {
            return Err(ClientError::Validation("nothing to update".into()));
        }
        let result = self.api.update_lead(id, &update).await;
        let lead = match result {
            Ok(lead) => lead,
            Err(err) => {
                self.store
                    .set(keys::LEADS_ERROR, Value::String(err.to_string()));
                return Err(err);
            }
        };
        if let Some(mut page) = self.current_page() {
            if let Some(slot) = page.leads.iter_mut().find(|l| l.id == lead.id) {
                *slot = lead.clone();
                self.store.set_as(keys::LEADS_PAGE, &page);
            }
        }
        Ok(lead)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
