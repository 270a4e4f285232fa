//! Metadata captured from the HTTP request that opened a connection.

use std::collections::HashMap;

/// Path and query parameters of an upgrade request.
///
/// Query values are percent-decoded. When a key repeats, the first
/// occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    path: String,
    query: HashMap<String, String>,
}

impl UpgradeRequest {
    /// Builds a request from a path and a raw (still encoded) query string.
    pub fn new(path: impl Into<String>, raw_query: Option<&str>) -> Self {
        let mut query = HashMap::new();
        if let Some(raw) = raw_query {
            for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
                query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
            }
        }
        Self {
            path: path.into(),
            query,
        }
    }

    /// Parses a request target such as `/ws?channel=room1&echo=true`.
    pub fn from_target(target: &str) -> Self {
        match target.split_once('?') {
            Some((path, query)) => Self::new(path, Some(query)),
            None => Self::new(target, None),
        }
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the decoded value of a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}
