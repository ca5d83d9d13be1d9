//! Upgrade request parsing: room identity and query parameters.
//!
//! Room resolution precedence:
//! 1. `?room=<name>` query parameter
//! 2. request path with one leading `/` stripped
//! 3. [`DEFAULT_ROOM`]

use std::borrow::Cow;

/// Room used when neither the query nor the path names one.
pub const DEFAULT_ROOM: &str = "default";

/// The parts of an inbound upgrade request the relay cares about.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectRequest<'a> {
    /// `Origin` header, if the client sent one
    pub origin: Option<&'a str>,
    /// Request path, e.g. `/doc1`
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: Option<&'a str>,
}

impl<'a> ConnectRequest<'a> {
    pub fn new(origin: Option<&'a str>, path: &'a str, query: Option<&'a str>) -> Self {
        Self { origin, path, query }
    }

    /// Look up a URL-decoded query parameter. The first occurrence wins.
    pub fn param(&self, name: &str) -> Option<Cow<'a, str>> {
        let query = self.query?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Resolve the room this request wants to join.
    pub fn room(&self) -> String {
        if let Some(room) = self.param("room").filter(|r| !r.is_empty()) {
            return room.into_owned();
        }
        let from_path = self.path.strip_prefix('/').unwrap_or(self.path);
        if from_path.is_empty() {
            DEFAULT_ROOM.to_string()
        } else {
            from_path.to_string()
        }
    }

    /// The `auth` token, if supplied and non-empty.
    pub fn auth_token(&self) -> Option<Cow<'a, str>> {
        self.param("auth").filter(|t| !t.is_empty())
    }
}

/// Shorten a token for log output.
pub(crate) fn truncate_token(token: &str) -> String {
    const SHOWN: usize = 12;
    match token.char_indices().nth(SHOWN) {
        Some((idx, _)) => format!("{}…", &token[..idx]),
        None => token.to_string(),
    }
}
