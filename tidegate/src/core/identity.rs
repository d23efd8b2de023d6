//! Client identity resolution
//!
//! The limiter keys its state by a resolved client identity, not by raw
//! request fields. Which resolution strategy applies is a property of the
//! route's policy; the identity itself is ephemeral and recomputed per
//! request.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Request facts supplied by the calling HTTP layer.
///
/// The core never parses HTTP; the boundary resolves the route, method,
/// authenticated user, and peer address and hands them over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Resolved route path, e.g. `/api/orders`
    pub route: String,
    /// HTTP method, e.g. `GET`
    pub method: String,
    /// Authenticated user id, if any
    pub user_id: Option<u64>,
    /// Peer network address
    pub remote_addr: IpAddr,
}

/// How a policy turns a request into a rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Always key by peer address.
    ByIp,
    /// Key by authenticated user; unauthenticated requests fall back to the
    /// peer address.
    ByUser,
    /// Key by user when authenticated, otherwise by peer address.
    Default,
}

impl Default for IdentityStrategy {
    fn default() -> Self {
        IdentityStrategy::Default
    }
}

/// Resolved identifier for whoever is making a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    /// Stable key, e.g. `ip:203.0.113.5` or `user:482`
    pub key: String,
}

impl ClientIdentity {
    /// Resolve an identity from a request per the given strategy.
    pub fn resolve(ctx: &RequestContext, strategy: IdentityStrategy) -> Self {
        let key = match strategy {
            IdentityStrategy::ByIp => Self::ip_key(ctx.remote_addr),
            IdentityStrategy::ByUser | IdentityStrategy::Default => match ctx.user_id {
                Some(user) => Self::user_key(user),
                None => Self::ip_key(ctx.remote_addr),
            },
        };
        ClientIdentity { key }
    }

    /// Key for an address-identified client.
    pub fn ip_key(addr: IpAddr) -> String {
        format!("ip:{addr}")
    }

    /// Key for a user-identified client.
    pub fn user_key(user_id: u64) -> String {
        format!("user:{user_id}")
    }
}
