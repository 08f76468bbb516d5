//! Views turn operator intent into API calls and write the outcome into the
//! [`StateContainer`](crate::store::StateContainer). Rendering is someone
//! else's job: it subscribes to the keys in [`keys`](crate::store::keys).

use serde_json::Value;

use crate::{http::ClientResult, store::StateContainer};

pub mod dashboard;
pub mod import;
pub mod leads;

pub use dashboard::DashboardView;
pub use import::ImportView;
pub use leads::{LeadFilters, LeadsView};

fn begin(store: &StateContainer, loading_key: &str) {
    store.set(loading_key, Value::Bool(true));
}

/// Clears the loading flag and records the error message, or clears it on
/// success. The result is passed through.
fn settle<T>(
    store: &StateContainer,
    loading_key: &str,
    error_key: &str,
    result: ClientResult<T>,
) -> ClientResult<T> {
    store.set(loading_key, Value::Bool(false));
    match &result {
        Ok(_) => store.set(error_key, Value::Null),
        Err(err) => store.set(error_key, Value::String(err.to_string())),
    };
    result
}
