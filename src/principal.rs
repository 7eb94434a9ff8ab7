//! Authenticated identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dn::Dn;

/// How strongly a principal proved its identity. Levels are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationLevel {
    /// Anonymous
    None,
    /// Name and password
    Simple,
    /// SASL or certificate based
    Strong,
}

/// Credentials presented at bind time.
///
/// Debug and Display always print `[REDACTED]`; the bytes are reachable only
/// through [`expose`](Self::expose).
///
/// ```
/// use directory_core::Credentials;
///
/// let creds = Credentials::new(b"hunter2".to_vec());
/// assert_eq!(format!("{:?}", creds), "[REDACTED]");
/// assert_eq!(creds.expose(), b"hunter2");
/// ```
// Do not derive Debug or Display here.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    bytes: Vec<u8>,
}

impl Credentials {
    /// Wraps credential bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the raw credential bytes.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// An identity a session acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: Dn,
    level: AuthenticationLevel,
    credentials: Option<Credentials>,
}

impl Principal {
    /// The anonymous principal: empty name, no credentials.
    pub fn anonymous() -> Self {
        Self {
            name: Dn::root(),
            level: AuthenticationLevel::None,
            credentials: None,
        }
    }

    /// A principal authenticated at `level`.
    pub fn new(name: Dn, level: AuthenticationLevel) -> Self {
        Self {
            name,
            level,
            credentials: None,
        }
    }

    /// Attaches the credentials used to authenticate.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The principal's DN.
    pub fn name(&self) -> &Dn {
        &self.name
    }

    /// Authentication strength.
    pub fn level(&self) -> AuthenticationLevel {
        self.level
    }

    /// Bind credentials, if retained.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether this is the anonymous identity.
    pub fn is_anonymous(&self) -> bool {
        self.level == AuthenticationLevel::None && self.name.is_root()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_root() {
            f.write_str("anonymous")
        } else {
            write!(f, "{}", self.name.user_form())
        }
    }
}
