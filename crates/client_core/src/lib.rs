//! Client side of the lead distribution CRM: keyed UI state, a coalescing
//! HTTP client, the session and the three views.

pub mod coalescer;
pub mod context;
pub mod error;
pub mod http;
pub mod session;
pub mod store;
pub mod views;

pub use coalescer::RequestCoalescer;
pub use context::{AppContext, ClientConfig, Tab};
pub use error::ClientError;
pub use http::{ClientResult, CrmApi, CrmClient};
pub use session::{AuthSession, Session};
pub use store::{StateContainer, Subscription};
pub use views::{DashboardView, ImportView, LeadFilters, LeadsView};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
