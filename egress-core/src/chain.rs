//! Upstream proxy chain resolution
//!
//! Grammar accepted for the upstream proxy URL:
//!
//! ```text
//! spec        = [ scheme "://" ] [ credentials "@" ] authority [ path ]
//! credentials = user [ ":" pass ]        ; split on the first ':' only
//! authority   = host [ ":" port ] | "[" v6 "]" [ ":" port ]
//! ```
//!
//! The credential segment ends at the first `@`, and the password keeps any
//! further colons. A missing port falls back to [`DEFAULT_PROXY_PORT`].
//! Host, user and password must not contain ASCII whitespace or control
//! characters; they end up verbatim on a single proxy configuration line.

use crate::error::ChainParseError;
use std::fmt;
use tracing::warn;
use zeroize::Zeroizing;

/// Port assumed when the proxy URL does not carry one
pub const DEFAULT_PROXY_PORT: u16 = 3128;

/// Login for the upstream proxy. Both parts are always non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    user: String,
    pass: Zeroizing<String>,
}

impl ProxyCredentials {
    /// Returns `None` unless both user and password are non-empty and
    /// free of whitespace and control characters
    pub fn new(user: &str, pass: &str) -> Option<Self> {
        if user.is_empty() || pass.is_empty() {
            return None;
        }
        if check_chars("user", user).is_err() || check_chars("password", pass).is_err() {
            return None;
        }
        Some(Self {
            user: user.to_string(),
            pass: Zeroizing::new(pass.to_string()),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn pass(&self) -> &str {
        &self.pass
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Strictly parsed upstream proxy URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub scheme: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxySpec {
    pub fn parse(input: &str) -> Result<Self, ChainParseError> {
        let input = input.trim();

        let (scheme, rest) = match input.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, input),
        };

        if let Some(ref scheme) = scheme {
            if scheme != "http" && scheme != "https" {
                return Err(ChainParseError::UnsupportedScheme(scheme.clone()));
            }
        }

        let (credential_segment, host_segment) = match rest.split_once('@') {
            Some((creds, host)) => (Some(creds), host),
            None => (None, rest),
        };

        let credentials = match credential_segment {
            Some(segment) => {
                let (user, pass) = segment.split_once(':').unwrap_or((segment, ""));
                check_chars("user", user)?;
                check_chars("password", pass)?;
                ProxyCredentials::new(user, pass)
            }
            None => None,
        };

        // Anything after the authority is irrelevant to a parent proxy
        let authority = host_segment
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();

        let (host, port) = split_host_port(authority)?;
        if host.is_empty() {
            return Err(ChainParseError::MissingHost);
        }
        check_chars("host", &host)?;

        Ok(Self {
            scheme,
            host,
            port,
            credentials,
        })
    }
}

fn split_host_port(authority: &str) -> Result<(String, Option<u16>), ChainParseError> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (addr, after) = bracketed
            .split_once(']')
            .ok_or(ChainParseError::MissingHost)?;
        let port = match after {
            "" | ":" => None,
            other => match other.strip_prefix(':') {
                Some(port) => Some(parse_port(port)?),
                None => return Err(ChainParseError::InvalidPort(other.to_string())),
            },
        };
        return Ok((addr.to_string(), port));
    }

    match authority.rsplit_once(':') {
        None => Ok((authority.to_string(), None)),
        Some((host, "")) => Ok((host.to_string(), None)),
        Some((host, port)) => Ok((host.to_string(), Some(parse_port(port)?))),
    }
}

fn check_chars(field: &'static str, value: &str) -> Result<(), ChainParseError> {
    if value
        .chars()
        .any(|c| c.is_ascii_whitespace() || c.is_control())
    {
        return Err(ChainParseError::InvalidCharacter { field });
    }
    Ok(())
}

fn parse_port(port: &str) -> Result<u16, ChainParseError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(ChainParseError::InvalidPort(port.to_string())),
        Ok(p) => Ok(p),
    }
}

/// Resolved parent proxy. An empty host means no chaining was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ChainDescriptor {
    /// Descriptor that requests no chaining
    pub fn none() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PROXY_PORT,
            credentials: None,
        }
    }

    /// Resolve a proxy URL plus optional separate credentials.
    ///
    /// Never fails: anything unparseable becomes [`ChainDescriptor::none`].
    /// Credentials embedded in the URL take precedence over `user`/`pass`.
    pub fn resolve(spec: &str, user: Option<&str>, pass: Option<&str>) -> Self {
        if spec.trim().is_empty() {
            return Self::none();
        }

        for (field, value) in [("user", user), ("password", pass)] {
            if let Some(Err(e)) = value.map(|v| check_chars(field, v)) {
                warn!("Ignoring upstream proxy credentials: {}", e);
                return Self::none();
            }
        }

        match ProxySpec::parse(spec) {
            Ok(parsed) => Self::from_spec(parsed, user, pass),
            Err(e) => {
                warn!("Ignoring upstream proxy URL: {}", e);
                Self::none()
            }
        }
    }

    pub fn from_spec(spec: ProxySpec, user: Option<&str>, pass: Option<&str>) -> Self {
        let credentials = spec.credentials.or_else(|| {
            ProxyCredentials::new(user.unwrap_or_default(), pass.unwrap_or_default())
        });

        Self {
            host: spec.host,
            port: spec.port.unwrap_or(DEFAULT_PROXY_PORT),
            credentials,
        }
    }

    pub fn is_chaining(&self) -> bool {
        !self.host.is_empty()
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ChainDescriptor {
    fn default() -> Self {
        Self::none()
    }
}
