//! The standard interceptor stages.
//!
//! This module provides:
//! - `NormalizationStage`: canonical DNs, attribute ids and filters
//! - `AuthenticationStage`: gate for anonymous sessions
//! - `ReferralStage`: refuses targets inside referred subtrees
//! - `AccessControlStage`: hides protected subtrees from non-administrators
//! - `OperationalAttributeStage`: stamps creator and modifier attributes
//!
//! [`build_chain`] assembles them in the configured order.

mod access_control;
mod authentication;
mod normalization;
mod operational;
mod referral;

pub use access_control::AccessControlStage;
pub use authentication::AuthenticationStage;
pub use normalization::NormalizationStage;
pub use operational::OperationalAttributeStage;
pub use referral::ReferralStage;

use serde::{Deserialize, Serialize};

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::interceptor::InterceptorChain;
use crate::schema::SchemaHandle;

/// Names a standard stage in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// [`NormalizationStage`]
    Normalization,
    /// [`AuthenticationStage`]
    Authentication,
    /// [`ReferralStage`]
    Referral,
    /// [`AccessControlStage`]
    AccessControl,
    /// [`OperationalAttributeStage`]
    OperationalAttributes,
}

impl StageKind {
    /// The default order.
    pub fn standard() -> &'static [StageKind] {
        &[
            StageKind::Normalization,
            StageKind::Authentication,
            StageKind::Referral,
            StageKind::AccessControl,
            StageKind::OperationalAttributes,
        ]
    }

    /// The stage's name in the chain.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Normalization => normalization::NAME,
            StageKind::Authentication => authentication::NAME,
            StageKind::Referral => referral::NAME,
            StageKind::AccessControl => access_control::NAME,
            StageKind::OperationalAttributes => operational::NAME,
        }
    }
}

/// Builds the chain `config.interceptors` describes.
///
/// # Errors
///
/// `Error::Configuration` if a stage's settings are invalid.
pub fn build_chain(config: &DirectoryConfig, schema: &SchemaHandle) -> Result<InterceptorChain> {
    let mut builder = InterceptorChain::builder();
    for kind in &config.interceptors {
        builder = match kind {
            StageKind::Normalization => builder.with(NormalizationStage::new(schema.clone())),
            StageKind::Authentication => {
                builder.with(AuthenticationStage::new(config.authentication))
            }
            StageKind::Referral => {
                builder.with(ReferralStage::from_config(&config.referrals, schema.clone())?)
            }
            StageKind::AccessControl => builder.with(AccessControlStage::from_config(
                &config.access_control,
                schema.clone(),
            )?),
            StageKind::OperationalAttributes => builder.with(OperationalAttributeStage),
        };
    }
    let chain = builder.build();
    tracing::debug!(stages = ?chain.names(), "interceptor chain built");
    Ok(chain)
}

/// The standard stages with default settings: no referral points and no
/// protected subtrees.
pub fn standard_chain(schema: &SchemaHandle) -> InterceptorChain {
    InterceptorChain::builder()
        .with(NormalizationStage::new(schema.clone()))
        .with(AuthenticationStage::default())
        .with(ReferralStage::new(schema.clone()))
        .with(AccessControlStage::new(schema.clone()))
        .with(OperationalAttributeStage)
        .build()
}
