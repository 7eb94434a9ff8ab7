//! Service configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```
//! use directory_core::{DirectoryConfig, ReferralHandlingMode, StageKind};
//!
//! let config = DirectoryConfig::from_json(r#"{ "size_limit": 100 }"#).unwrap();
//! assert_eq!(config.size_limit, 100);
//! assert_eq!(config.referral_handling, ReferralHandlingMode::Ignore);
//! assert_eq!(config.interceptors[0], StageKind::Normalization);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{FrameDecoder, PayloadDecoder, DEFAULT_MAX_FRAME_LENGTH};
use crate::dn::Dn;
use crate::error::{Error, Result};
use crate::request::{AliasDeref, RequestDefaults, ResultLimits};
use crate::session::ReferralHandlingMode;
use crate::stages::StageKind;

/// Top-level configuration of a [`DirectoryService`](crate::DirectoryService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Identifier reported by sessions
    pub service_id: String,
    /// Referral mode new sessions start with
    pub referral_handling: ReferralHandlingMode,
    /// Alias policy when a request leaves it unset
    pub alias_deref: AliasDeref,
    /// Default size limit for list and search; 0 is unlimited
    pub size_limit: usize,
    /// Default time limit in seconds; 0 is unlimited
    pub time_limit_secs: u64,
    /// Stage order
    pub interceptors: Vec<StageKind>,
    /// Referral points
    pub referrals: Vec<ReferralConfig>,
    /// Access control settings
    pub access_control: AccessControlConfig,
    /// Anonymous access settings
    pub authentication: AuthenticationConfig,
    /// Largest accepted frame payload in bytes
    pub max_frame_length: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            service_id: "default".to_string(),
            referral_handling: ReferralHandlingMode::Ignore,
            alias_deref: AliasDeref::Never,
            size_limit: 0,
            time_limit_secs: 0,
            interceptors: StageKind::standard().to_vec(),
            referrals: Vec::new(),
            access_control: AccessControlConfig::default(),
            authentication: AuthenticationConfig::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl DirectoryConfig {
    /// Parses and validates JSON text.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for malformed JSON, unknown fields or invalid
    /// values.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), service = %config.service_id, "loaded configuration");
        Ok(config)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(Error::configuration("service_id must not be empty"));
        }
        if self.max_frame_length == 0 {
            return Err(Error::configuration("max_frame_length must be positive"));
        }
        for referral in &self.referrals {
            parse_dn(&referral.dn)?;
            if referral.urls.is_empty() {
                return Err(Error::configuration(format!(
                    "referral '{}' has no urls",
                    referral.dn
                )));
            }
        }
        self.access_control.protected_dns()?;
        self.access_control.administrator_dns()?;
        Ok(())
    }

    /// A frame decoder honouring `max_frame_length`.
    pub fn frame_decoder<D: PayloadDecoder>(&self, payload: D) -> FrameDecoder<D> {
        FrameDecoder::with_max_frame_length(payload, self.max_frame_length)
    }

    /// Defaults captured in every session context.
    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            alias_deref: self.alias_deref,
            limits: ResultLimits {
                size: (self.size_limit > 0).then_some(self.size_limit),
                time: (self.time_limit_secs > 0).then(|| Duration::from_secs(self.time_limit_secs)),
            },
        }
    }
}

/// A subtree served by another directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferralConfig {
    /// Root of the referred subtree
    pub dn: String,
    /// Where clients should go instead
    pub urls: Vec<String>,
}

/// Which subtrees only administrators may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessControlConfig {
    /// Roots of protected subtrees
    pub protected: Vec<String>,
    /// Principals allowed into protected subtrees
    pub administrators: Vec<String>,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            protected: Vec::new(),
            administrators: vec!["uid=admin,ou=system".to_string()],
        }
    }
}

impl AccessControlConfig {
    /// Parsed protected subtree roots.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for a malformed DN.
    pub fn protected_dns(&self) -> Result<Vec<Dn>> {
        self.protected.iter().map(|s| parse_dn(s)).collect()
    }

    /// Parsed administrator names.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for a malformed DN.
    pub fn administrator_dns(&self) -> Result<Vec<Dn>> {
        self.administrators.iter().map(|s| parse_dn(s)).collect()
    }
}

/// What anonymous sessions may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthenticationConfig {
    /// Allow compare, list, lookup and search
    pub allow_anonymous_reads: bool,
    /// Allow add, delete, modify, move and rename
    pub allow_anonymous_writes: bool,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            allow_anonymous_reads: true,
            allow_anonymous_writes: false,
        }
    }
}

fn parse_dn(text: &str) -> Result<Dn> {
    Dn::parse(text).map_err(|e| Error::configuration(format!("bad DN in configuration: {}", e)))
}
