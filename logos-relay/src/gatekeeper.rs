//! Connection gatekeeping.
//!
//! Runs inside the WebSocket handshake, before the upgrade response is sent.
//! Two independent gates, both must pass:
//!
//! - **Origin**: only when an allow-list is configured. Entries are exact
//!   origins or `*.domain` wildcard rules (optionally with a scheme).
//!   Development mode additionally trusts localhost.
//! - **Token**: only in [`AuthMode::Token`]. Wire format:
//!
//! ```text
//! base64url(JSON {"userId": "...", "expiry": <unix seconds>}) "." hex(HMAC-SHA256(secret, payload_b64))
//! ```
//!
//! A rejected request never reaches the room registry.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::{AuthConfig, AuthMode, Environment};
use crate::request::{truncate_token, ConnectRequest};

type HmacSha256 = Hmac<Sha256>;

/// Authenticated identity carried by a connection token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    /// Unix seconds; the token is valid up to and including this second
    pub expiry: u64,
}

/// Why a connection was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),
    #[error("Missing origin header")]
    MissingOrigin,
    #[error("Signing secret not configured")]
    SecretNotConfigured,
    #[error("No auth token provided")]
    MissingToken,
    #[error("Invalid token format: expected 2 parts, got {0}")]
    MalformedToken(usize),
    #[error("Token signature mismatch")]
    BadSignature,
    #[error("Invalid token payload: {0}")]
    BadPayload(String),
    #[error("Token expired at {expiry} (now {now})")]
    Expired { expiry: u64, now: u64 },
}

impl Rejection {
    /// True for failures of the origin gate (HTTP 403) rather than the
    /// token gate (HTTP 401).
    pub fn is_origin(&self) -> bool {
        matches!(self, Self::OriginNotAllowed(_) | Self::MissingOrigin)
    }
}

/// One allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    /// Full origin, compared case-insensitively
    Exact(String),
    /// `[scheme://]*.domain`: any subdomain of `domain`, not the apex
    Subdomain {
        scheme: Option<String>,
        domain: String,
    },
}

impl OriginRule {
    fn parse(entry: &str) -> Self {
        let entry = entry.trim().trim_end_matches('/').to_ascii_lowercase();
        let (scheme, rest) = match entry.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_string()), rest.to_string()),
            None => (None, entry.clone()),
        };
        match rest.strip_prefix("*.") {
            Some(domain) => Self::Subdomain {
                scheme,
                domain: domain.to_string(),
            },
            None => Self::Exact(entry),
        }
    }

    fn matches(&self, origin: &str, parsed: Option<&url::Url>) -> bool {
        match self {
            Self::Exact(expected) => origin
                .trim_end_matches('/')
                .eq_ignore_ascii_case(expected),
            Self::Subdomain { scheme, domain } => {
                let Some(url) = parsed else { return false };
                let Some(host) = url.host_str() else {
                    return false;
                };
                if let Some(scheme) = scheme {
                    if url.scheme() != scheme {
                        return false;
                    }
                }
                host.len() > domain.len() + 1
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
            }
        }
    }
}

fn is_localhost(url: &url::Url) -> bool {
    matches!(url.scheme(), "http" | "https")
        && matches!(
            url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        )
}

/// Accept/reject decisions for inbound upgrade requests.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    mode: AuthMode,
    secret: Option<Vec<u8>>,
    origins: Vec<OriginRule>,
    environment: Environment,
}

impl Gatekeeper {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            mode: config.mode,
            secret: config
                .secret
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
            origins: config
                .allowed_origins
                .iter()
                .map(|o| OriginRule::parse(o))
                .collect(),
            environment: config.environment,
        }
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Evaluate a request against the current system time.
    pub fn evaluate(&self, request: &ConnectRequest<'_>) -> Result<Option<Identity>, Rejection> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.evaluate_at(request, now)
    }

    /// Evaluate a request at `now` (unix seconds).
    ///
    /// Returns the token identity in token mode, `None` in open mode.
    pub fn evaluate_at(
        &self,
        request: &ConnectRequest<'_>,
        now: u64,
    ) -> Result<Option<Identity>, Rejection> {
        let origin = request.origin.unwrap_or("unknown");
        let room = request.room();
        let token = request.auth_token();
        let shown = token
            .as_deref()
            .map(truncate_token)
            .unwrap_or_else(|| "none".to_string());
        log::debug!("Connection attempt from origin {origin} to room {room}, token {shown}");

        let result = self
            .check_origin(request.origin)
            .and_then(|()| match self.mode {
                AuthMode::Open => Ok(None),
                AuthMode::Token => self.verify_token(token.as_deref(), now).map(Some),
            });

        match &result {
            Ok(Some(identity)) => log::info!(
                "Accepted connection from {origin} to room {room}, token {shown}, user {}",
                identity.user_id
            ),
            Ok(None) => log::info!("Accepted connection from {origin} to room {room}, token {shown}"),
            Err(reason) => log::warn!(
                "Rejected connection from {origin} to room {room}, token {shown}: {reason}"
            ),
        }
        result
    }

    fn check_origin(&self, origin: Option<&str>) -> Result<(), Rejection> {
        if self.origins.is_empty() {
            return Ok(());
        }
        let origin = origin.ok_or(Rejection::MissingOrigin)?;
        let parsed = url::Url::parse(origin).ok();

        if self.environment == Environment::Development
            && parsed.as_ref().is_some_and(is_localhost)
        {
            return Ok(());
        }
        if self
            .origins
            .iter()
            .any(|rule| rule.matches(origin, parsed.as_ref()))
        {
            Ok(())
        } else {
            Err(Rejection::OriginNotAllowed(origin.to_string()))
        }
    }

    /// Verify a token and return its identity.
    pub fn verify_token(&self, token: Option<&str>, now: u64) -> Result<Identity, Rejection> {
        let secret = self.secret.as_deref().ok_or(Rejection::SecretNotConfigured)?;
        let token = token.filter(|t| !t.is_empty()).ok_or(Rejection::MissingToken)?;

        let parts: Vec<&str> = token.split('.').collect();
        let [payload_b64, signature] = parts.as_slice() else {
            return Err(Rejection::MalformedToken(parts.len()));
        };

        let signature = hex::decode(signature).map_err(|_| Rejection::BadSignature)?;
        let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Rejection::BadSignature)?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Rejection::BadSignature)?;

        let identity = decode_payload(payload_b64)?;
        if now > identity.expiry {
            return Err(Rejection::Expired {
                expiry: identity.expiry,
                now,
            });
        }
        Ok(identity)
    }
}

fn decode_payload(payload_b64: &str) -> Result<Identity, Rejection> {
    let trimmed = payload_b64.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| Rejection::BadPayload(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| Rejection::BadPayload(e.to_string()))
}

/// Why a token could not be minted.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Signing secret is empty")]
    EmptySecret,
    #[error("Failed to encode token payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Invalid signing key: {0}")]
    Key(#[from] hmac::digest::InvalidLength),
}

/// Mint a token in the wire format [`Gatekeeper::verify_token`] accepts.
pub fn sign_token(secret: &str, identity: &Identity) -> Result<String, SigningError> {
    if secret.is_empty() {
        return Err(SigningError::EmptySecret);
    }
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(identity)?);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(payload_b64.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{payload_b64}.{signature}"))
}
