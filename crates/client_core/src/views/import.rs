use std::sync::Arc;

use shared::{domain::Role, protocol::ImportSummary};
use tracing::info;

use crate::{
    error::ClientError,
    http::{ClientResult, CrmApi},
    session::AuthSession,
    store::{keys, StateContainer},
};

use super::{begin, settle};

#[derive(Clone)]
pub struct ImportView {
    api: Arc<dyn CrmApi>,
    store: StateContainer,
    session: AuthSession,
}

impl ImportView {
    pub fn new(api: Arc<dyn CrmApi>, store: StateContainer, session: AuthSession) -> Self {
        Self {
            api,
            store,
            session,
        }
    }

    /// Uploads a CSV file. Rows the server rejected are listed in the summary;
    /// they do not fail the upload.
    pub async fn upload(&self, csv: Vec<u8>) -> ClientResult<ImportSummary> {
        self.session.require_role(Role::Admin)?;
        if csv.iter().all(u8::is_ascii_whitespace) {
            return Err(ClientError::Validation("the CSV file is empty".into()));
        }
        begin(&self.store, keys::IMPORT_LOADING);
        let bytes = csv.len();
        let result = self.api.import_leads(csv).await;
        let summary = settle(&self.store, keys::IMPORT_LOADING, keys::IMPORT_ERROR, result)?;
        info!(
            bytes,
            imported = summary.imported,
            duplicates = summary.duplicates,
            rejected = summary.errors.len(),
            "csv uploaded"
        );
        self.store.set_as(keys::IMPORT_SUMMARY, &summary);
        Ok(summary)
    }

    pub fn last_summary(&self) -> Option<ImportSummary> {
        self.store.get_as(keys::IMPORT_SUMMARY)
    }
}
