use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{Lead, LeadId, Seller, UserId},
    error::ApiError,
    protocol::{
        BulkAssignRequest, BulkAssignResponse, CandidatePoolResponse, DistributionCriteria,
        ImportSummary, LeadListQuery, LeadPage, LeadStats, LoginRequest, LoginResponse,
        ProvinceCount, UpdateLeadRequest,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{coalescer::RequestCoalescer, error::ClientError};

pub type ClientResult<T> = Result<T, ClientError>;

/// The backend as the views see it.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> ClientResult<LoginResponse>;
    /// Forgets the bearer token.
    fn logout(&self);
    async fn list_leads(&self, query: &LeadListQuery) -> ClientResult<LeadPage>;
    async fn lead_stats(&self) -> ClientResult<LeadStats>;
    async fn provinces_with_unassigned(&self) -> ClientResult<Vec<ProvinceCount>>;
    async fn candidate_pool(
        &self,
        criteria: &DistributionCriteria,
    ) -> ClientResult<CandidatePoolResponse>;
    async fn list_sellers(&self) -> ClientResult<Vec<Seller>>;
    async fn execute_distribution(
        &self,
        req: &BulkAssignRequest,
    ) -> ClientResult<BulkAssignResponse>;
    async fn update_lead(&self, id: LeadId, update: &UpdateLeadRequest) -> ClientResult<Lead>;
    async fn import_leads(&self, csv: Vec<u8>) -> ClientResult<ImportSummary>;
    async fn touch_last_access(&self, user_id: UserId) -> ClientResult<()>;
}

type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// The bearer token plus a counter bumped on every change, so requests sent
/// under an older token never share a coalescing key with newer ones.
#[derive(Debug, Clone, Default)]
struct Bearer {
    token: Option<String>,
    generation: u64,
}

/// `reqwest` client for the CRM HTTP API. GETs are coalesced per token
/// generation, path and query string.
pub struct CrmClient {
    http: Client,
    server_url: Url,
    bearer: RwLock<Bearer>,
    gets: RequestCoalescer<String, ClientResult<Value>>,
    on_unauthorized: RwLock<Option<UnauthorizedHook>>,
}

impl CrmClient {
    pub fn new(server_url: &str) -> ClientResult<Self> {
        let server_url = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| ClientError::Validation(format!("invalid server url '{server_url}': {e}")))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ClientError::Validation(format!(
                "server url must be http or https, got '{}'",
                server_url.scheme()
            )));
        }
        Ok(Self {
            http: Client::new(),
            server_url,
            bearer: RwLock::new(Bearer::default()),
            gets: RequestCoalescer::new(),
            on_unauthorized: RwLock::new(None),
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Runs after the token is dropped because the server answered 401.
    pub fn set_unauthorized_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self
            .on_unauthorized
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(hook));
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    fn bearer(&self) -> Bearer {
        self.bearer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn token(&self) -> Option<String> {
        self.bearer().token
    }

    fn set_token(&self, token: Option<String>) {
        let mut bearer = self
            .bearer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bearer.token = token;
        bearer.generation += 1;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url.as_str().trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.authorized(method, path, self.token())
    }

    fn authorized(&self, method: Method, path: &str, token: Option<String>) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Coalesced GET returning the raw JSON body.
    async fn get_json<T: DeserializeOwned>(&self, path: String) -> ClientResult<T> {
        let Bearer { token, generation } = self.bearer();
        let builder = self.authorized(Method::GET, &path, token);
        let value = self
            .gets
            .run(format!("{generation}:{path}"), move || fetch_json(builder))
            .await;
        let value = self.observe(value)?;
        serde_json::from_value(value).map_err(|e| ClientError::Api {
            status: 200,
            message: format!("unexpected response body for {path}: {e}"),
        })
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self.request(method, path).json(body).send().await;
        let response = self.observe(checked(response).await)?;
        response.json::<T>().await.map_err(|e| ClientError::Api {
            status: 200,
            message: format!("unexpected response body for {path}: {e}"),
        })
    }

    /// Drops the session on 401 before handing the error back.
    fn observe<T>(&self, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(err) = &result {
            if err.is_auth() && self.has_token() {
                warn!(error = %err, "server rejected session token");
                self.set_token(None);
                let hook = self
                    .on_unauthorized
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
        }
        result
    }
}

async fn fetch_json(builder: RequestBuilder) -> ClientResult<Value> {
    let response = checked(builder.send().await).await?;
    Ok(response.json::<Value>().await?)
}

async fn checked(response: reqwest::Result<Response>) -> ClientResult<Response> {
    check(response?).await
}

/// Turns non-2xx responses into [`ClientError`]s.
async fn check(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let body = response.json::<ApiError>().await.ok();
    debug!(status = status.as_u16(), ?body, "request failed");
    Err(ClientError::from_response(status.as_u16(), body, retry_after))
}

/// Query string in a fixed field order so equal queries share a coalescing key.
pub fn lead_query_string(query: &LeadListQuery) -> String {
    let mut pairs = url::form_urlencoded::Serializer::new(String::new());
    if let Some(status) = query.status {
        pairs.append_pair("status", status.as_str());
    }
    if let Some(province) = &query.province {
        pairs.append_pair("province", province);
    }
    if let Some(seller) = &query.seller {
        pairs.append_pair("seller", seller);
    }
    if let Some(search) = &query.search {
        pairs.append_pair("search", search);
    }
    if let Some(page) = query.page {
        pairs.append_pair("page", &page.to_string());
    }
    if let Some(limit) = query.limit {
        pairs.append_pair("limit", &limit.to_string());
    }
    if let Some(sort_by) = query.sort_by {
        pairs.append_pair("sortBy", sort_by.as_str());
    }
    if let Some(direction) = query.sort_direction {
        pairs.append_pair("sortDirection", direction.as_str());
    }
    pairs.finish()
}

fn criteria_query_string(criteria: &DistributionCriteria) -> String {
    let mut pairs = url::form_urlencoded::Serializer::new(String::new());
    if let Some(status) = criteria.status {
        pairs.append_pair("status", status.as_str());
    }
    if let Some(province) = &criteria.province {
        pairs.append_pair("province", province);
    }
    pairs.append_pair("unassignedOnly", &criteria.unassigned_only.to_string());
    pairs.finish()
}

fn with_query(path: &str, query: String) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn login(&self, username: &str, password: &str) -> ClientResult<LoginResponse> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&body)
            .send()
            .await?;
        let response: LoginResponse = check(response).await?.json().await?;
        self.set_token(Some(response.token.clone()));
        info!(user_id = %response.user.id, role = response.user.role.as_str(), "logged in");
        Ok(response)
    }

    fn logout(&self) {
        self.set_token(None);
    }

    async fn list_leads(&self, query: &LeadListQuery) -> ClientResult<LeadPage> {
        self.get_json(with_query("/leads", lead_query_string(query)))
            .await
    }

    async fn lead_stats(&self) -> ClientResult<LeadStats> {
        self.get_json("/leads/stats".to_string()).await
    }

    async fn provinces_with_unassigned(&self) -> ClientResult<Vec<ProvinceCount>> {
        self.get_json("/leads/provinces-with-unassigned".to_string())
            .await
    }

    async fn candidate_pool(
        &self,
        criteria: &DistributionCriteria,
    ) -> ClientResult<CandidatePoolResponse> {
        self.get_json(with_query("/leads/candidates", criteria_query_string(criteria)))
            .await
    }

    async fn list_sellers(&self) -> ClientResult<Vec<Seller>> {
        self.get_json("/users/sellers".to_string()).await
    }

    async fn execute_distribution(
        &self,
        req: &BulkAssignRequest,
    ) -> ClientResult<BulkAssignResponse> {
        let response: BulkAssignResponse = self
            .send_json(Method::POST, "/leads/bulk-assign", req)
            .await?;
        info!(
            strategy = %req.strategy,
            assigned = response.assigned_count,
            "distribution executed"
        );
        Ok(response)
    }

    async fn update_lead(&self, id: LeadId, update: &UpdateLeadRequest) -> ClientResult<Lead> {
        self.send_json(Method::PUT, &format!("/leads/{id}"), update)
            .await
    }

    async fn import_leads(&self, csv: Vec<u8>) -> ClientResult<ImportSummary> {
        let response = self
            .request(Method::POST, "/leads/import")
            .header(header::CONTENT_TYPE, "text/csv")
            .body(csv)
            .send()
            .await;
        let response = self.observe(checked(response).await)?;
        Ok(response.json().await?)
    }

    async fn touch_last_access(&self, user_id: UserId) -> ClientResult<()> {
        let response = self
            .request(Method::PUT, &format!("/users/{user_id}/last-access"))
            .send()
            .await;
        self.observe(checked(response).await)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use shared::{
        domain::LeadStatus,
        protocol::{LeadSortField, SortDirection},
    };

    use super::*;

    #[test]
    fn lead_query_string_is_stable() {
        let query = LeadListQuery {
            status: Some(LeadStatus::Contacted),
            province: Some("San Juan".into()),
            seller: Some("unassigned".into()),
            page: Some(2),
            limit: Some(20),
            sort_by: Some(LeadSortField::Name),
            sort_direction: Some(SortDirection::Asc),
            ..LeadListQuery::default()
        };
        assert_eq!(
            lead_query_string(&query),
            "status=contacted&province=San+Juan&seller=unassigned&page=2&limit=20&sortBy=name&sortDirection=asc"
        );
        assert_eq!(lead_query_string(&LeadListQuery::default()), "");
    }

    #[test]
    fn server_url_must_be_http() {
        assert!(CrmClient::new("http://127.0.0.1:8080/").is_ok());
        assert!(matches!(
            CrmClient::new("ftp://example.com"),
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(CrmClient::new("not a url"), Err(ClientError::Validation(_))));
    }
}
