//! Widget tokens.
//!
//! A widget token lets a website embed one assistant. It is an HS256 JWT signed with the
//! service's `secret_key` and carries the domains it may be used from and the assistant's
//! `widget_version` at issue time. Bumping the assistant's version revokes every token issued
//! before.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    auth::session::map_jwt_error,
    errors::Error,
    types::{AssistantId, UserId},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetClaims {
    /// Assistant the token grants access to
    pub sub: AssistantId,
    pub owner_id: UserId,
    pub domains: Vec<String>,
    pub widget_version: i32,
    pub iat: i64,
    pub exp: i64,
}

impl WidgetClaims {
    pub fn new(assistant_id: AssistantId, owner_id: UserId, domains: Vec<String>, widget_version: i32, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: assistant_id,
            owner_id,
            domains: domains.iter().filter_map(|d| normalize_domain(d)).collect(),
            widget_version,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

pub fn create_widget_token(claims: &WidgetClaims, secret: &str) -> Result<String, Error> {
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(|e| Error::Internal {
        operation: format!("create widget token: {e}"),
    })
}

/// Check signature and expiry. Domain and version checks are left to the caller.
pub fn verify_widget_token(token: &str, secret: &str) -> Result<WidgetClaims, Error> {
    let data = decode::<WidgetClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map_err(map_jwt_error)?;
    Ok(data.claims)
}

/// Reduce an origin, URL or bare host to a comparable host name.
///
/// `https://www.Example.com:8443/path` becomes `example.com`. Returns `None` when nothing is
/// left.
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim().to_lowercase();
    let without_scheme = trimmed.split_once("://").map_or(trimmed.as_str(), |(_, rest)| rest);
    let host_port = without_scheme.split(['/', '?', '#']).next().unwrap_or_default();
    // Drop credentials and port
    let host_port = host_port.rsplit_once('@').map_or(host_port, |(_, host)| host);
    let host = host_port.split(':').next().unwrap_or_default().trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    if host.is_empty() { None } else { Some(host.to_string()) }
}

/// Whether `origin` is one of `domains` or a subdomain of one.
pub fn domain_allowed<S: AsRef<str>>(domains: &[S], origin: &str) -> bool {
    let Some(origin) = normalize_domain(origin) else {
        return false;
    };
    domains
        .iter()
        .filter_map(|d| normalize_domain(d.as_ref()))
        .any(|allowed| origin == allowed || origin.strip_suffix(&allowed).is_some_and(|prefix| prefix.ends_with('.')))
}
