//! Per-connection sessions.
//!
//! A [`CoreSession`] turns caller arguments into an [`OperationRequest`],
//! hands it to the service's interceptor chain and returns the result
//! unchanged. Each request carries a [`SessionContext`] snapshot, so stages
//! read the session state that was current when the request was built.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cursor::EntryCursor;
use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::Result;
use crate::filter::Filter;
use crate::interceptor::Outcome;
use crate::principal::{AuthenticationLevel, Principal};
use crate::request::{OperationRequest, RequestDefaults, ResultLimits, Scope};
use crate::service::DirectoryService;
use crate::value::Value;

/// What referral-aware stages do when a target lies below a referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferralHandlingMode {
    /// Treat referral entries as ordinary entries
    #[default]
    Ignore,
    /// Return the referral so the client can chase it
    Follow,
    /// Fail the operation with the referral
    SignalError,
}

#[derive(Debug, Clone)]
struct SessionState {
    id: u64,
    service_id: String,
    authenticated: Principal,
    authorized: Option<Principal>,
    referral_mode: ReferralHandlingMode,
    defaults: RequestDefaults,
}

/// Immutable snapshot of session state attached to every request.
///
/// Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SessionContext {
    state: Arc<SessionState>,
}

impl SessionContext {
    /// A context for `authenticated` with default referral mode and
    /// request defaults.
    pub fn new(id: u64, service_id: impl Into<String>, authenticated: Principal) -> Self {
        Self {
            state: Arc::new(SessionState {
                id,
                service_id: service_id.into(),
                authenticated,
                authorized: None,
                referral_mode: ReferralHandlingMode::default(),
                defaults: RequestDefaults::default(),
            }),
        }
    }

    /// Sets the proxied identity.
    pub fn with_authorized(mut self, principal: Option<Principal>) -> Self {
        Arc::make_mut(&mut self.state).authorized = principal;
        self
    }

    /// Sets the referral mode.
    pub fn with_referral_mode(mut self, mode: ReferralHandlingMode) -> Self {
        Arc::make_mut(&mut self.state).referral_mode = mode;
        self
    }

    /// Sets the request defaults.
    pub fn with_defaults(mut self, defaults: RequestDefaults) -> Self {
        Arc::make_mut(&mut self.state).defaults = defaults;
        self
    }

    /// Session id, unique within one service.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Id of the service the session belongs to.
    pub fn service_id(&self) -> &str {
        &self.state.service_id
    }

    /// The identity that bound the connection.
    pub fn authenticated_principal(&self) -> &Principal {
        &self.state.authenticated
    }

    /// The proxied identity, if any.
    pub fn authorized_principal(&self) -> Option<&Principal> {
        self.state.authorized.as_ref()
    }

    /// The authorized principal if set, otherwise the authenticated one.
    pub fn effective_principal(&self) -> &Principal {
        self.state
            .authorized
            .as_ref()
            .unwrap_or(&self.state.authenticated)
    }

    /// Referral handling mode.
    pub fn referral_mode(&self) -> ReferralHandlingMode {
        self.state.referral_mode
    }

    /// Defaults for optional request fields.
    pub fn defaults(&self) -> &RequestDefaults {
        &self.state.defaults
    }
}

/// A caller's session with a [`DirectoryService`].
///
/// Sessions are meant for one caller at a time; the service behind them is
/// shared.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use directory_core::{
///     AuthenticationLevel, DirectoryService, Dn, Entry, Filter, MemoryBackend, Principal,
///     Scope, SchemaHandle, SchemaRegistry,
/// };
///
/// let schema = SchemaHandle::new(SchemaRegistry::core());
/// let backend = Arc::new(MemoryBackend::new(schema.clone()));
/// let service = DirectoryService::builder("example", schema, backend).build();
///
/// let admin = Principal::new(Dn::parse("uid=admin,ou=system").unwrap(), AuthenticationLevel::Simple);
/// let session = service.session(admin);
/// session.add(Entry::new(Dn::parse("o=acme").unwrap()).with("o", "acme")).unwrap();
/// session.add(Entry::new(Dn::parse("cn=alice,o=acme").unwrap()).with("cn", "alice")).unwrap();
///
/// let found: Vec<_> = session
///     .search(&Dn::parse("o=acme").unwrap(), Scope::OneLevel, Filter::eq("cn", "ALICE"))
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Debug)]
pub struct CoreSession {
    service: DirectoryService,
    context: SessionContext,
}

impl CoreSession {
    pub(crate) fn new(service: DirectoryService, context: SessionContext) -> Self {
        Self { service, context }
    }

    /// The service this session is bound to.
    pub fn directory_service(&self) -> &DirectoryService {
        &self.service
    }

    /// Id of the bound service.
    pub fn service_id(&self) -> &str {
        self.context.service_id()
    }

    /// Session id.
    pub fn id(&self) -> u64 {
        self.context.id()
    }

    /// Snapshot of the current session state.
    pub fn context(&self) -> SessionContext {
        self.context.clone()
    }

    /// See [`SessionContext::effective_principal`].
    pub fn effective_principal(&self) -> &Principal {
        self.context.effective_principal()
    }

    /// The identity that bound the session. Never absent.
    pub fn authenticated_principal(&self) -> &Principal {
        self.context.authenticated_principal()
    }

    /// The proxied identity, if any.
    pub fn authorized_principal(&self) -> Option<&Principal> {
        self.context.authorized_principal()
    }

    /// Act on behalf of `principal` until cleared.
    pub fn authorize_as(&mut self, principal: Principal) {
        tracing::debug!(session = self.id(), principal = %principal, "proxied authorization");
        self.context = self.context.clone().with_authorized(Some(principal));
    }

    /// Drop the proxied identity.
    pub fn clear_authorization(&mut self) {
        self.context = self.context.clone().with_authorized(None);
    }

    /// Authentication level of the effective principal.
    pub fn authentication_level(&self) -> AuthenticationLevel {
        self.effective_principal().level()
    }

    /// Current referral mode.
    pub fn referral_handling_mode(&self) -> ReferralHandlingMode {
        self.context.referral_mode()
    }

    /// Changes the referral mode for subsequent requests.
    pub fn set_referral_handling_mode(&mut self, mode: ReferralHandlingMode) {
        self.context = self.context.clone().with_referral_mode(mode);
    }

    /// Dispatches a prepared request.
    ///
    /// # Errors
    ///
    /// Whatever the interceptor chain or backend reports.
    pub fn dispatch(&self, request: OperationRequest) -> Result<Outcome> {
        self.service.dispatch(request)
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn add(&self, entry: Entry) -> Result<()> {
        let request = OperationRequest::add(self.context(), entry)?;
        self.dispatch(request)?.into_done("add")
    }

    /// Tests whether `dn` holds `value` in `attribute`.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn compare(&self, dn: &Dn, attribute: &str, value: impl Into<Value>) -> Result<bool> {
        let request = OperationRequest::compare(self.context(), dn.clone(), attribute, value)?;
        self.dispatch(request)?.into_compared("compare")
    }

    /// Deletes a leaf entry.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn delete(&self, dn: &Dn) -> Result<()> {
        let request = OperationRequest::delete(self.context(), dn.clone())?;
        self.dispatch(request)?.into_done("delete")
    }

    /// Lists the children of `dn` with the session's default limits.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged. Limit errors surface while iterating.
    pub fn list(&self, dn: &Dn) -> Result<EntryCursor> {
        let request = OperationRequest::list(self.context()).base(dn.clone()).build()?;
        self.dispatch(request)?.into_entries("list")
    }

    /// Lists the children of `dn` with explicit attributes and limits
    /// (zero means unlimited).
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn list_with_limits(
        &self,
        dn: &Dn,
        attributes: &[&str],
        size_limit: usize,
        time_limit: Duration,
    ) -> Result<EntryCursor> {
        let mut request = OperationRequest::list(self.context())
            .base(dn.clone())
            .attributes(attributes.iter().copied())
            .build()?;
        request.set_size_limit(size_limit)?;
        request.set_time_limit(time_limit)?;
        self.dispatch(request)?.into_entries("list")
    }

    /// Reads one entry. An empty `attributes` returns all of them.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn lookup(&self, dn: &Dn, attributes: &[&str]) -> Result<Entry> {
        let attributes = attributes.iter().map(|a| a.to_string()).collect();
        let request = OperationRequest::lookup(self.context(), dn.clone(), attributes)?;
        self.dispatch(request)?.into_entry("lookup")
    }

    /// Applies modifications in order.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn modify(&self, dn: &Dn, modifications: Vec<Modification>) -> Result<()> {
        let request = OperationRequest::modify(self.context(), dn.clone(), modifications)?;
        self.dispatch(request)?.into_done("modify")
    }

    /// Moves an entry under `new_parent`.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn move_entry(&self, dn: &Dn, new_parent: &Dn) -> Result<()> {
        let request = OperationRequest::move_entry(self.context(), dn.clone(), new_parent.clone())?;
        self.dispatch(request)?.into_done("move")
    }

    /// Moves and renames an entry.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn move_and_rename(
        &self,
        dn: &Dn,
        new_parent: &Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let request = OperationRequest::move_and_rename(
            self.context(),
            dn.clone(),
            new_parent.clone(),
            new_rdn,
            delete_old_rdn,
        )?;
        self.dispatch(request)?.into_done("moveAndRename")
    }

    /// Renames an entry in place.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn rename(&self, dn: &Dn, new_rdn: Rdn, delete_old_rdn: bool) -> Result<()> {
        let request = OperationRequest::rename(self.context(), dn.clone(), new_rdn, delete_old_rdn)?;
        self.dispatch(request)?.into_done("rename")
    }

    /// Searches below `base` with the session's default limits.
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged. Limit errors surface while iterating.
    pub fn search(&self, base: &Dn, scope: Scope, filter: Filter) -> Result<EntryCursor> {
        let request = OperationRequest::search(self.context())
            .base(base.clone())
            .scope(scope)
            .filter(filter)
            .build()?;
        self.dispatch(request)?.into_entries("search")
    }

    /// Searches with explicit attributes and limits (zero means unlimited).
    ///
    /// # Errors
    ///
    /// Any dispatch error, unchanged.
    pub fn search_with_limits(
        &self,
        base: &Dn,
        scope: Scope,
        filter: Filter,
        attributes: &[&str],
        size_limit: usize,
        time_limit: Duration,
    ) -> Result<EntryCursor> {
        let request = OperationRequest::search(self.context())
            .base(base.clone())
            .scope(scope)
            .filter(filter)
            .attributes(attributes.iter().copied())
            .limits(ResultLimits {
                size: (size_limit > 0).then_some(size_limit),
                time: (!time_limit.is_zero()).then_some(time_limit),
            })
            .build()?;
        self.dispatch(request)?.into_entries("search")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Principal {
        Principal::new(
            Dn::parse("uid=admin,ou=system").unwrap(),
            AuthenticationLevel::Simple,
        )
    }

    #[test]
    fn effective_principal_falls_back_to_authenticated() {
        let ctx = SessionContext::new(1, "svc", admin());
        assert_eq!(ctx.effective_principal(), &admin());

        let proxied = Principal::new(Dn::parse("uid=bob,o=acme").unwrap(), AuthenticationLevel::Simple);
        let ctx = ctx.with_authorized(Some(proxied.clone()));
        assert_eq!(ctx.effective_principal(), &proxied);
        assert_eq!(ctx.authenticated_principal(), &admin());
    }

    #[test]
    fn snapshots_do_not_see_later_changes() {
        let before = SessionContext::new(1, "svc", admin());
        let after = before
            .clone()
            .with_referral_mode(ReferralHandlingMode::SignalError);
        assert_eq!(before.referral_mode(), ReferralHandlingMode::Ignore);
        assert_eq!(after.referral_mode(), ReferralHandlingMode::SignalError);
    }

    #[test]
    fn referral_mode_parses_from_kebab_case() {
        let mode: ReferralHandlingMode = serde_json::from_str("\"signal-error\"").unwrap();
        assert_eq!(mode, ReferralHandlingMode::SignalError);
    }
}
