//! Typed object locators.
//!
//! An [`ObjectUri`] is the `{scheme, authority, path}` triple used to address
//! stored bundles and job outputs. Parsing accepts any syntactically valid
//! scheme; whether a scheme is usable for storage is a separate check
//! ([`ObjectUri::ensure_supported`]) applied by [`crate::queue::Job`].
//!
//! ```text
//! s3://bundles/3f2a...e1.bundle
//! └┬┘  └──┬──┘└───────┬────────┘
//! scheme authority   path
//! ```

use crate::constants::SUPPORTED_SCHEMES;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Immutable, structurally compared URI value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectUri {
    scheme: String,
    authority: String,
    path: String,
}

impl ObjectUri {
    /// Creates a URI from its parts.
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            authority: authority.into(),
            path: path.into(),
        }
    }

    /// Parses `scheme:[//authority]path[?query][#fragment]`.
    ///
    /// Query and fragment are discarded.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri.split_once(':').ok_or_else(|| invalid("missing scheme"))?;

        let mut chars = scheme.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return Err(invalid("scheme must start with a letter")),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            return Err(invalid("scheme contains invalid characters"));
        }

        let rest = rest.split(['?', '#']).next().unwrap_or("");

        let (authority, path) = match rest.strip_prefix("//") {
            Some(hier) => match hier.find('/') {
                Some(idx) => (&hier[..idx], &hier[idx..]),
                None => (hier, ""),
            },
            None => ("", rest),
        };

        Ok(Self::new(scheme.to_ascii_lowercase(), authority, path))
    }

    /// URI scheme (lowercase when parsed).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// URI authority; empty when absent.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// URI path, including its leading `/` when present.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Object-store key: the path without its leading `/`.
    pub fn key(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// Returns a copy with a different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Returns a copy whose path has `segment` appended after a `/`.
    pub fn join(&self, segment: &str) -> Self {
        let base = self.path.trim_end_matches('/');
        self.with_path(format!("{}/{}", base, segment.trim_start_matches('/')))
    }

    /// Returns true if the scheme is one the storage layer can serve.
    pub fn is_supported(&self) -> bool {
        SUPPORTED_SCHEMES.contains(&self.scheme.as_str())
    }

    /// Fails with [`Error::UnsupportedScheme`] unless [`Self::is_supported`].
    pub fn ensure_supported(&self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(Error::UnsupportedScheme {
                uri: self.to_uri_string(),
                scheme: self.scheme.clone(),
            })
        }
    }

    /// Canonical string form.
    ///
    /// `scheme://authority/path`; an empty authority is omitted, leaving
    /// `scheme:///path` for absolute paths and `scheme:path` otherwise.
    pub fn to_uri_string(&self) -> String {
        if !self.authority.is_empty() || self.path.starts_with('/') {
            format!("{}://{}{}", self.scheme, self.authority, self.path)
        } else {
            format!("{}:{}", self.scheme, self.path)
        }
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri_string())
    }
}

impl FromStr for ObjectUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
