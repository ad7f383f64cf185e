//! Cookie model and `Set-Cookie` parsing.
//!
//! Attribute parsing is delegated to the [`cookie`] crate; this module wraps
//! the parsed result with the request-URL context a bare `Set-Cookie` value
//! does not carry: the effective domain, the cross-domain rejection rule, and
//! an absolute expiration instant with `Max-Age` taking precedence over
//! `Expires`.

use std::{error::Error as StdError, fmt};

use cookie::Cookie as RawCookie;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::scope;

/// The `SameSite` attribute as stored in a jar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    None,
    Lax,
    Strict,
    #[default]
    Unspecified,
}

impl From<Option<cookie::SameSite>> for SameSite {
    fn from(value: Option<cookie::SameSite>) -> Self {
        match value {
            Some(cookie::SameSite::None) => SameSite::None,
            Some(cookie::SameSite::Lax) => SameSite::Lax,
            Some(cookie::SameSite::Strict) => SameSite::Strict,
            None => SameSite::Unspecified,
        }
    }
}

/// When a cookie stops being valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    /// Lives for the lifetime of the identity; never swept.
    Session,
    /// Expires at an absolute instant.
    At(#[serde(with = "time::serde::timestamp")] OffsetDateTime),
}

impl Expiry {
    /// Whether the cookie is expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        match self {
            Expiry::Session => false,
            Expiry::At(instant) => *instant <= now,
        }
    }
}

/// A cookie as stored in an identity's jar.
///
/// `domain` is normalized: lowercase, no leading dot. The `Domain` attribute
/// as declared by the server (if any) is kept separately in
/// `declared_domain`; a cookie without one is host-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_domain: Option<String>,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: SameSite,
    pub expiry: Expiry,
}

impl StoredCookie {
    /// The jar equality key.
    #[must_use]
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.domain, &self.path, &self.name)
    }

    /// The `name=value` pair as it appears in a `Cookie` header.
    #[must_use]
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Parses a `Set-Cookie` header value into a [`StoredCookie`].
///
/// When `request_url` is provided, a declared `Domain` must equal the request
/// host or be a dotted suffix of it; anything else is rejected as a
/// cross-domain injection attempt. A declared `Domain` that is a bare public
/// suffix is rejected unless the request host *is* that suffix, in which case
/// the cookie downgrades to host-only. A missing `Domain` scopes the cookie
/// to the request host.
///
/// Without a `request_url`, the cookie must declare a `Domain`.
pub fn parse_set_cookie(
    value: &str,
    request_url: Option<&Url>,
    now: OffsetDateTime,
) -> Result<StoredCookie, ParseCookieError> {
    let raw = RawCookie::parse(value.trim()).map_err(ParseCookieError::Syntax)?;

    let host = request_url
        .and_then(Url::host_str)
        .map(|h| h.to_ascii_lowercase());

    let declared = raw
        .domain()
        .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty());

    let domain = match (&declared, &host) {
        (Some(declared), Some(host)) => {
            if declared != host && !host.ends_with(&format!(".{declared}")) {
                return Err(ParseCookieError::CrossDomain {
                    declared: declared.clone(),
                    host: host.clone(),
                });
            }
            if scope::is_public_suffix(declared) && declared != host {
                return Err(ParseCookieError::PublicSuffixScope {
                    declared: declared.clone(),
                });
            }
            declared.clone()
        }
        (Some(declared), None) => declared.clone(),
        (None, Some(host)) => host.clone(),
        (None, None) => return Err(ParseCookieError::MissingHost),
    };

    // `Max-Age` takes precedence over `Expires`.
    let expiry = if let Some(max_age) = raw.max_age() {
        Expiry::At(now + max_age)
    } else if let Some(instant) = raw.expires_datetime() {
        Expiry::At(instant)
    } else {
        Expiry::Session
    };

    let path = match raw.path() {
        Some(p) if p.starts_with('/') => p.to_owned(),
        _ => "/".to_owned(),
    };

    Ok(StoredCookie {
        name: raw.name().to_owned(),
        value: raw.value().to_owned(),
        domain,
        declared_domain: declared,
        path,
        secure: raw.secure().unwrap_or(false),
        http_only: raw.http_only().unwrap_or(false),
        same_site: raw.same_site().into(),
        expiry,
    })
}

/// Joins cookies into a `Cookie` header value: `"n1=v1; n2=v2"`.
#[must_use]
pub fn serialize_cookie_header<'a, I>(cookies: I) -> String
where
    I: IntoIterator<Item = &'a StoredCookie>,
{
    cookies
        .into_iter()
        .map(StoredCookie::pair)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The error type returned when a `Set-Cookie` value cannot be stored.
#[derive(Debug)]
pub enum ParseCookieError {
    /// The value is not a well-formed cookie.
    Syntax(cookie::ParseError),
    /// The declared `Domain` does not cover the request host.
    CrossDomain { declared: String, host: String },
    /// The declared `Domain` is a bare public suffix.
    PublicSuffixScope { declared: String },
    /// No request URL and no `Domain` attribute to scope the cookie with.
    MissingHost,
}

impl ParseCookieError {
    /// Whether this rejection should be logged as a security event.
    #[must_use]
    pub fn is_security_block(&self) -> bool {
        matches!(
            self,
            ParseCookieError::CrossDomain { .. } | ParseCookieError::PublicSuffixScope { .. }
        )
    }
}

impl StdError for ParseCookieError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ParseCookieError::Syntax(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ParseCookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCookieError::Syntax(_) => f.write_str("malformed cookie"),
            ParseCookieError::CrossDomain { declared, host } => {
                write!(f, "domain {declared:?} does not cover request host {host:?}")
            }
            ParseCookieError::PublicSuffixScope { declared } => {
                write!(f, "domain {declared:?} is a bare public suffix")
            }
            ParseCookieError::MissingHost => {
                f.write_str("cookie has no domain and no request URL was given")
            }
        }
    }
}
