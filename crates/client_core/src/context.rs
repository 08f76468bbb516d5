use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::domain::Role;
use tracing::info;

use crate::{
    error::ClientError,
    http::{ClientResult, CrmApi, CrmClient},
    session::{self, AuthSession},
    store::{keys, StateContainer},
    views::{DashboardView, ImportView, LeadsView},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    Dashboard,
    Leads,
    Import,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Dashboard, Tab::Leads, Tab::Import];

    pub fn as_str(self) -> &'static str {
        match self {
            Tab::Dashboard => "dashboard",
            Tab::Leads => "leads",
            Tab::Import => "import",
        }
    }

    pub fn allowed_for(self, role: Role) -> bool {
        match (self, role) {
            (_, Role::Admin) => true,
            (Tab::Leads, Role::Seller) => true,
            (Tab::Dashboard | Tab::Import, Role::Seller) => false,
        }
    }

    /// Where a freshly logged-in user lands.
    pub fn home(role: Role) -> Tab {
        match role {
            Role::Admin => Tab::Dashboard,
            Role::Seller => Tab::Leads,
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tab {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tab::ALL
            .into_iter()
            .find(|tab| tab.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ClientError::Validation(format!("unknown tab '{s}'")))
    }
}

/// Everything a client session owns. Built by [`AppContext::init`], torn down
/// by [`AppContext::destroy`]; views are handed out by reference.
pub struct AppContext {
    config: ClientConfig,
    store: StateContainer,
    api: Arc<dyn CrmApi>,
    session: AuthSession,
    leads: LeadsView,
    dashboard: DashboardView,
    import: ImportView,
}

impl AppContext {
    pub fn init(config: ClientConfig) -> ClientResult<Self> {
        let client = CrmClient::new(&config.server_url)?;
        let store = StateContainer::new();
        let expired = store.clone();
        client.set_unauthorized_hook(move || session::expire(&expired));
        info!(server_url = %client.server_url(), "client context ready");
        Ok(Self::with_api(config, store, Arc::new(client)))
    }

    /// Assembles a context around any backend.
    pub fn with_api(config: ClientConfig, store: StateContainer, api: Arc<dyn CrmApi>) -> Self {
        let session = AuthSession::new(api.clone(), store.clone());
        Self {
            leads: LeadsView::new(api.clone(), store.clone(), config.page_size),
            dashboard: DashboardView::new(api.clone(), store.clone(), session.clone()),
            import: ImportView::new(api.clone(), store.clone(), session.clone()),
            config,
            store,
            api,
            session,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &StateContainer {
        &self.store
    }

    pub fn api(&self) -> &Arc<dyn CrmApi> {
        &self.api
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn leads(&self) -> &LeadsView {
        &self.leads
    }

    pub fn dashboard(&self) -> &DashboardView {
        &self.dashboard
    }

    pub fn import(&self) -> &ImportView {
        &self.import
    }

    pub fn current_tab(&self) -> Option<Tab> {
        self.store.get_as(keys::UI_TAB)
    }

    /// Checks the role, records the tab under `ui.tab` and loads its data.
    pub async fn switch_tab(&self, tab: Tab) -> ClientResult<()> {
        let principal = self
            .session
            .principal()
            .ok_or_else(|| ClientError::Auth("not logged in".into()))?;
        if !tab.allowed_for(principal.role) {
            return Err(ClientError::Forbidden(format!(
                "the {tab} tab is for administrators"
            )));
        }
        self.store.set_as(keys::UI_TAB, &tab);
        match tab {
            Tab::Dashboard => {
                self.dashboard.refresh().await?;
            }
            Tab::Leads => {
                self.leads.refresh().await?;
            }
            Tab::Import => {}
        }
        Ok(())
    }

    /// Logs out and forgets all state and subscriptions.
    pub fn destroy(self) {
        self.session.logout();
        self.store.clear();
        info!("client context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sellers_only_reach_the_leads_tab() {
        assert!(Tab::Leads.allowed_for(Role::Seller));
        assert!(!Tab::Dashboard.allowed_for(Role::Seller));
        assert!(!Tab::Import.allowed_for(Role::Seller));
        assert!(Tab::ALL.iter().all(|tab| tab.allowed_for(Role::Admin)));
        assert_eq!(Tab::home(Role::Seller), Tab::Leads);
    }

    #[test]
    fn tabs_parse_case_insensitively() {
        assert_eq!("Import".parse::<Tab>().expect("tab"), Tab::Import);
        assert!(matches!("reports".parse::<Tab>(), Err(ClientError::Validation(_))));
    }
}
