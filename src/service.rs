//! The directory service: schema, interceptor chain and backend shared by
//! every session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::Backend;
use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::interceptor::{InterceptorChain, Outcome};
use crate::normalization::NameComponentNormalizer;
use crate::principal::Principal;
use crate::request::{OperationRequest, RequestDefaults};
use crate::schema::SchemaHandle;
use crate::session::{CoreSession, ReferralHandlingMode, SessionContext};
use crate::stages;

struct Inner {
    id: String,
    schema: SchemaHandle,
    chain: InterceptorChain,
    backend: Arc<dyn Backend>,
    defaults: RequestDefaults,
    referral_mode: ReferralHandlingMode,
    next_session: AtomicU64,
}

/// Shared entry point of a directory. Cloning is cheap and clones share
/// everything, including the session counter.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use directory_core::{DirectoryConfig, DirectoryService, MemoryBackend, SchemaHandle, SchemaRegistry};
///
/// let schema = SchemaHandle::new(SchemaRegistry::core());
/// let backend = Arc::new(MemoryBackend::new(schema.clone()));
/// let config = DirectoryConfig::from_json(r#"{ "service_id": "acme", "size_limit": 50 }"#).unwrap();
///
/// let service = DirectoryService::from_config(&config, schema, backend).unwrap();
/// assert_eq!(service.id(), "acme");
/// assert_eq!(service.chain().len(), 5);
/// ```
#[derive(Clone)]
pub struct DirectoryService {
    inner: Arc<Inner>,
}

impl DirectoryService {
    /// Starts a service over `backend`. Without an explicit chain the
    /// standard stages are used.
    pub fn builder(
        id: impl Into<String>,
        schema: SchemaHandle,
        backend: Arc<dyn Backend>,
    ) -> ServiceBuilder {
        ServiceBuilder {
            id: id.into(),
            schema,
            backend,
            chain: None,
            defaults: RequestDefaults::default(),
            referral_mode: ReferralHandlingMode::default(),
        }
    }

    /// Builds a service as `config` describes.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if the configuration is invalid.
    pub fn from_config(
        config: &DirectoryConfig,
        schema: SchemaHandle,
        backend: Arc<dyn Backend>,
    ) -> Result<Self> {
        config.validate()?;
        let chain = stages::build_chain(config, &schema)?;
        Ok(Self::builder(config.service_id.clone(), schema, backend)
            .chain(chain)
            .defaults(config.request_defaults())
            .referral_mode(config.referral_handling)
            .build())
    }

    /// Service identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The live schema handle.
    pub fn schema(&self) -> &SchemaHandle {
        &self.inner.schema
    }

    /// A normalizer over the current schema snapshot.
    pub fn normalizer(&self) -> NameComponentNormalizer {
        NameComponentNormalizer::new(self.inner.schema.snapshot())
    }

    /// The interceptor chain.
    pub fn chain(&self) -> &InterceptorChain {
        &self.inner.chain
    }

    /// Defaults captured by new sessions.
    pub fn defaults(&self) -> RequestDefaults {
        self.inner.defaults
    }

    /// Opens a session bound as `principal`.
    pub fn session(&self, principal: Principal) -> CoreSession {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(service = %self.inner.id, session = id, principal = %principal, "session opened");
        let context = SessionContext::new(id, self.inner.id.clone(), principal)
            .with_referral_mode(self.inner.referral_mode)
            .with_defaults(self.inner.defaults);
        CoreSession::new(self.clone(), context)
    }

    /// Runs `request` through the chain and backend.
    ///
    /// # Errors
    ///
    /// Whatever a stage or the backend reports.
    pub fn dispatch(&self, request: OperationRequest) -> Result<Outcome> {
        self.inner
            .chain
            .dispatch(request, self.inner.backend.as_ref())
    }
}

impl fmt::Debug for DirectoryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryService")
            .field("id", &self.inner.id)
            .field("stages", &self.inner.chain.names())
            .field("defaults", &self.inner.defaults)
            .field("referral_mode", &self.inner.referral_mode)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`DirectoryService::builder`].
pub struct ServiceBuilder {
    id: String,
    schema: SchemaHandle,
    backend: Arc<dyn Backend>,
    chain: Option<InterceptorChain>,
    defaults: RequestDefaults,
    referral_mode: ReferralHandlingMode,
}

impl ServiceBuilder {
    /// Uses `chain` instead of the standard stages.
    pub fn chain(mut self, chain: InterceptorChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Request defaults for new sessions.
    pub fn defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Referral mode new sessions start with.
    pub fn referral_mode(mut self, mode: ReferralHandlingMode) -> Self {
        self.referral_mode = mode;
        self
    }

    /// Finishes the service.
    pub fn build(self) -> DirectoryService {
        let chain = self
            .chain
            .unwrap_or_else(|| stages::standard_chain(&self.schema));
        tracing::info!(service = %self.id, stages = ?chain.names(), "directory service ready");
        DirectoryService {
            inner: Arc::new(Inner {
                id: self.id,
                schema: self.schema,
                chain,
                backend: self.backend,
                defaults: self.defaults,
                referral_mode: self.referral_mode,
                next_session: AtomicU64::new(1),
            }),
        }
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("id", &self.id)
            .field("chain", &self.chain.as_ref().map(|c| c.names()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::dn::Dn;
    use crate::schema::SchemaRegistry;

    fn service() -> DirectoryService {
        let schema = SchemaHandle::new(SchemaRegistry::core());
        let backend = Arc::new(MemoryBackend::new(schema.clone()));
        DirectoryService::builder("svc", schema, backend)
            .referral_mode(ReferralHandlingMode::Follow)
            .build()
    }

    #[test]
    fn sessions_get_distinct_ids_and_service_settings() {
        let service = service();
        let a = service.session(Principal::anonymous());
        let b = service.clone().session(Principal::anonymous());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.service_id(), "svc");
        assert_eq!(a.referral_handling_mode(), ReferralHandlingMode::Follow);
    }

    #[test]
    fn default_chain_is_standard() {
        let names = service().chain().names().len();
        assert_eq!(names, 5);
    }

    #[test]
    fn normalizer_follows_published_schema() {
        let service = service();
        let dn = Dn::parse("favouriteDrink=tea").unwrap();
        assert!(service.normalizer().normalize_dn(&dn).is_err());

        let extended = SchemaRegistry::builder()
            .extend_from(&SchemaRegistry::core())
            .attribute_type(
                crate::schema::AttributeType::new("1.3.6.1.4.1.99999.1").name("favouriteDrink"),
            )
            .build()
            .unwrap();
        service.schema().publish(extended);
        assert!(service.normalizer().normalize_dn(&dn).is_ok());
    }
}
