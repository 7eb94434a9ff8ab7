use crate::config::ReferralConfig;
use crate::dn::Dn;
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, Next, Outcome};
use crate::normalization::NameComponentNormalizer;
use crate::request::{Operation, OperationKind, OperationRequest};
use crate::schema::SchemaHandle;
use crate::session::ReferralHandlingMode;

pub(super) const NAME: &str = "referral";

/// Subtrees served elsewhere.
///
/// Under [`ReferralHandlingMode::Ignore`] referral points are ordinary
/// entries and the stage does nothing. Otherwise an operation whose target
/// (or destination, for moves) lies inside a referred subtree aborts with
/// the referral URLs in the reason, and list or search results drop entries
/// from referred subtrees below the base.
///
/// The stage never contacts the referred servers. `Follow` and
/// `SignalError` both abort; they differ only in the reason text, and
/// chasing the URLs is left to the caller.
#[derive(Debug, Clone)]
pub struct ReferralStage {
    schema: SchemaHandle,
    referrals: Vec<Referral>,
}

#[derive(Debug, Clone)]
struct Referral {
    dn: Dn,
    urls: Vec<String>,
}

impl ReferralStage {
    /// Stage with no referral points.
    pub fn new(schema: SchemaHandle) -> Self {
        Self {
            schema,
            referrals: Vec::new(),
        }
    }

    /// Adds a referral point.
    pub fn with_referral(mut self, dn: Dn, urls: Vec<String>) -> Self {
        self.referrals.push(Referral { dn, urls });
        self
    }

    /// Stage with the configured referral points.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for a malformed DN.
    pub fn from_config(referrals: &[ReferralConfig], schema: SchemaHandle) -> Result<Self> {
        referrals.iter().try_fold(Self::new(schema), |stage, r| {
            let dn = Dn::parse(&r.dn).map_err(|e| {
                Error::configuration(format!("bad referral DN '{}': {}", r.dn, e))
            })?;
            Ok(stage.with_referral(dn, r.urls.clone()))
        })
    }

    fn normalized(&self, n: &NameComponentNormalizer) -> Result<Vec<Referral>> {
        self.referrals
            .iter()
            .map(|r| {
                Ok(Referral {
                    dn: n.normalize_dn(&r.dn)?,
                    urls: r.urls.clone(),
                })
            })
            .collect()
    }
}

impl Interceptor for ReferralStage {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
        let mode = request.session().referral_mode();
        if mode == ReferralHandlingMode::Ignore || self.referrals.is_empty() {
            return next.proceed(request);
        }

        let n = NameComponentNormalizer::new(self.schema.snapshot());
        let referrals = self.normalized(&n)?;
        let target = n.normalize_dn(request.dn())?;
        let destination = match request.operation() {
            Operation::Move { new_parent } | Operation::MoveAndRename { new_parent, .. } => {
                Some(n.normalize_dn(new_parent)?)
            }
            _ => None,
        };

        let hit = referrals.iter().find(|r| {
            target.is_within(&r.dn) || destination.as_ref().is_some_and(|d| d.is_within(&r.dn))
        });
        if let Some(referral) = hit {
            let urls = referral.urls.join(" ");
            request.log().debug(format_args!(
                "target inside referral '{}'",
                referral.dn.user_form()
            ));
            let reason = match mode {
                ReferralHandlingMode::Follow => format!("referral: {}", urls),
                _ => format!(
                    "'{}' is served by another directory: {}",
                    request.dn().user_form(),
                    urls
                ),
            };
            return Err(Error::abort(NAME, reason));
        }

        let searching = matches!(request.kind(), OperationKind::List | OperationKind::Search);
        let below: Vec<Dn> = referrals
            .into_iter()
            .map(|r| r.dn)
            .filter(|dn| dn.is_within(&target))
            .collect();
        if !searching || below.is_empty() {
            return next.proceed(request);
        }
        match next.proceed(request)? {
            Outcome::Entries(cursor) => Ok(Outcome::Entries(cursor.retain(move |entry| {
                n.normalize_dn(entry.dn())
                    .map(|dn| !below.iter().any(|r| dn.is_within(r)))
                    .unwrap_or(false)
            }))),
            other => Ok(other),
        }
    }
}
