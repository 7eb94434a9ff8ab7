use crate::config::AuthenticationConfig;
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, Next, Outcome};
use crate::request::{OperationKind, OperationRequest};

pub(super) const NAME: &str = "authentication";

/// Refuses operations an anonymous session is not allowed to perform.
///
/// A lookup of the root DSE is always allowed so clients can discover the
/// naming contexts before binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticationStage {
    config: AuthenticationConfig,
}

impl AuthenticationStage {
    /// Stage enforcing `config`.
    pub fn new(config: AuthenticationConfig) -> Self {
        Self { config }
    }

    fn permits_anonymous(&self, request: &OperationRequest) -> bool {
        let kind = request.kind();
        if kind == OperationKind::Lookup && request.dn().is_root() {
            return true;
        }
        if kind.is_mutating() {
            self.config.allow_anonymous_writes
        } else {
            self.config.allow_anonymous_reads
        }
    }
}

impl Interceptor for AuthenticationStage {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
        let principal = request.session().effective_principal();
        if principal.is_anonymous() && !self.permits_anonymous(&request) {
            request
                .log()
                .info(format_args!("anonymous {} refused", request.kind()));
            return Err(Error::abort(
                NAME,
                format!("anonymous {} is not permitted", request.kind()),
            ));
        }
        next.proceed(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::dn::Dn;
    use crate::interceptor::InterceptorChain;
    use crate::principal::{AuthenticationLevel, Principal};
    use crate::schema::{SchemaHandle, SchemaRegistry};
    use crate::session::SessionContext;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(SchemaHandle::new(SchemaRegistry::core()))
    }

    fn chain(config: AuthenticationConfig) -> InterceptorChain {
        InterceptorChain::builder()
            .with(AuthenticationStage::new(config))
            .build()
    }

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn anonymous_writes_are_refused_by_default() {
        let ctx = SessionContext::new(1, "test", Principal::anonymous());
        let request = OperationRequest::delete(ctx, dn("cn=bob,o=acme")).unwrap();
        let err = chain(AuthenticationConfig::default())
            .dispatch(request, &backend())
            .unwrap_err();
        assert!(matches!(err, Error::StageAbort { ref stage, .. } if stage == "authentication"));
    }

    #[test]
    fn anonymous_reads_reach_the_backend() {
        let ctx = SessionContext::new(1, "test", Principal::anonymous());
        let request = OperationRequest::lookup(ctx, dn("cn=bob,o=acme"), Vec::new()).unwrap();
        // Passing the stage means the backend answers, here with "no such object".
        let err = chain(AuthenticationConfig::default())
            .dispatch(request, &backend())
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[test]
    fn root_dse_is_open_even_without_anonymous_reads() {
        let config = AuthenticationConfig {
            allow_anonymous_reads: false,
            allow_anonymous_writes: false,
        };
        let ctx = SessionContext::new(1, "test", Principal::anonymous());
        let root = OperationRequest::lookup(ctx.clone(), Dn::root(), Vec::new()).unwrap();
        assert!(chain(config).dispatch(root, &backend()).is_ok());

        let other = OperationRequest::lookup(ctx, dn("o=acme"), Vec::new()).unwrap();
        assert!(matches!(
            chain(config).dispatch(other, &backend()),
            Err(Error::StageAbort { .. })
        ));
    }

    #[test]
    fn authorized_identity_decides() {
        let admin = Principal::new(dn("uid=admin,ou=system"), AuthenticationLevel::Simple);
        let ctx = SessionContext::new(1, "test", Principal::anonymous()).with_authorized(Some(admin));
        let request = OperationRequest::delete(ctx, dn("cn=bob,o=acme")).unwrap();
        let err = chain(AuthenticationConfig::default())
            .dispatch(request, &backend())
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
