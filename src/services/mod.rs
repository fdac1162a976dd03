//! Core proxy services: addressing, signing, the shared outbound client,
//! the object inventory, the mirror writer, and the forwarding service
//! that ties them together.

pub mod addressing;
pub mod http_client;
pub mod inventory_service;
pub mod mirror_service;
pub mod proxy_service;
pub mod signer;
