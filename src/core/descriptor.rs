//! Request descriptors as sent by callers.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single ordered query parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub key: String,
    pub value: String,
}

impl QueryParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// What a caller asks the broker to do.
///
/// The method travels as a plain string so that descriptors naming an unknown
/// method still decode; they are refused when the outbound request is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Account the request is performed as
    pub account_id: String,
    /// HTTP or WebDAV method name, e.g. `GET` or `PROPFIND`
    pub method: String,
    /// Path below the account's base URI, must start with `/`
    pub url: String,
    /// Ordered query parameters; wins over `legacy_params` when non-empty
    pub query_params: Option<Vec<QueryParam>>,
    /// Unordered query parameters kept for older callers
    pub legacy_params: BTreeMap<String, String>,
    /// Header name to values; multiple values are joined with `,`
    pub headers: BTreeMap<String, Vec<String>>,
    /// Optional textual request body
    pub body_text: Option<String>,
    /// Token issued to the caller when it was paired with the account
    pub token: String,
    /// Whether the upstream request follows redirects
    pub follow_redirects: bool,
}

impl RequestDescriptor {
    pub fn new(
        account_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            method: method.into(),
            url: url.into(),
            query_params: None,
            legacy_params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body_text: None,
            token: token.into(),
            follow_redirects: true,
        }
    }

    /// Append a value to a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Append an ordered query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params
            .get_or_insert_with(Vec::new)
            .push(QueryParam::new(key, value));
        self
    }

    /// Set a legacy (unordered) query parameter
    pub fn with_legacy_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.legacy_params.insert(key.into(), value.into());
        self
    }

    pub fn with_body_text(mut self, body: impl Into<String>) -> Self {
        self.body_text = Some(body.into());
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

/// Methods the broker knows how to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Propfind,
    Mkcol,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Propfind => "PROPFIND",
            Method::Mkcol => "MKCOL",
            Method::Head => "HEAD",
        }
    }

    /// Whether a request body may be attached for this method
    pub fn accepts_body(self) -> bool {
        matches!(
            self,
            Method::Post | Method::Put | Method::Patch | Method::Propfind
        )
    }
}

impl FromStr for Method {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "PROPFIND" => Ok(Method::Propfind),
            "MKCOL" => Ok(Method::Mkcol),
            "HEAD" => Ok(Method::Head),
            other => Err(BrokerError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
