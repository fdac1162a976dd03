//! Routing for the proxy.
//!
//! The proxy is transparent: it exposes no endpoints of its own. A single
//! fallback hands every method and every path (including `/`) to the
//! dispatcher, so no route can ever shadow a bucket name.

use crate::{handlers::proxy_handlers::dispatch, services::proxy_service::ProxyService};
use axum::Router;

/// Build the router. The router carries shared state (`ProxyService`) to
/// the dispatcher.
pub fn routes() -> Router<ProxyService> {
    Router::new().fallback(dispatch)
}
