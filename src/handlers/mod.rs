//! HTTP handlers. There is exactly one: the dispatcher that every inbound
//! request falls through to.

pub mod proxy_handlers;
