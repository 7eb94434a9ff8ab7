use crate::config::AccessControlConfig;
use crate::cursor::EntryCursor;
use crate::dn::Dn;
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, Next, Outcome};
use crate::normalization::NameComponentNormalizer;
use crate::principal::Principal;
use crate::request::{Operation, OperationKind, OperationRequest};
use crate::schema::SchemaHandle;

pub(super) const NAME: &str = "access-control";

/// Keeps protected subtrees away from everyone but administrators.
///
/// A list or search based inside a protected subtree returns no entries;
/// one based above it returns everything except the protected entries. Any
/// other operation touching a protected subtree aborts, as does moving or
/// renaming an entry above one. Names are compared in normalized form.
#[derive(Debug, Clone)]
pub struct AccessControlStage {
    schema: SchemaHandle,
    protected: Vec<Dn>,
    administrators: Vec<Dn>,
}

impl AccessControlStage {
    /// Stage without protected subtrees.
    pub fn new(schema: SchemaHandle) -> Self {
        Self {
            schema,
            protected: Vec::new(),
            administrators: Vec::new(),
        }
    }

    /// Protects the subtree rooted at `dn`.
    pub fn protect(mut self, dn: Dn) -> Self {
        self.protected.push(dn);
        self
    }

    /// Grants `name` access to protected subtrees.
    pub fn administrator(mut self, name: Dn) -> Self {
        self.administrators.push(name);
        self
    }

    /// Stage with the configured subtrees and administrators.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for a malformed DN.
    pub fn from_config(config: &AccessControlConfig, schema: SchemaHandle) -> Result<Self> {
        let stage = config
            .protected_dns()?
            .into_iter()
            .fold(Self::new(schema), Self::protect);
        Ok(config
            .administrator_dns()?
            .into_iter()
            .fold(stage, Self::administrator))
    }

    fn is_administrator(&self, n: &NameComponentNormalizer, principal: &Principal) -> bool {
        if principal.is_anonymous() {
            return false;
        }
        let Ok(name) = n.normalize_dn(principal.name()) else {
            return false;
        };
        self.administrators
            .iter()
            .filter_map(|a| n.normalize_dn(a).ok())
            .any(|a| a == name)
    }
}

impl Interceptor for AccessControlStage {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
        if self.protected.is_empty() {
            return next.proceed(request);
        }
        let n = NameComponentNormalizer::new(self.schema.snapshot());
        if self.is_administrator(&n, request.session().effective_principal()) {
            return next.proceed(request);
        }

        let protected = self
            .protected
            .iter()
            .map(|dn| n.normalize_dn(dn))
            .collect::<Result<Vec<_>>>()?;
        let target = n.normalize_dn(request.dn())?;
        let destination = match request.operation() {
            Operation::Move { new_parent } | Operation::MoveAndRename { new_parent, .. } => {
                Some(n.normalize_dn(new_parent)?)
            }
            _ => None,
        };
        let inside = |dn: &Dn| protected.iter().any(|p| dn.is_within(p));
        let searching = matches!(request.kind(), OperationKind::List | OperationKind::Search);

        if inside(&target) {
            request.log().info(format_args!(
                "denied to {}",
                request.session().effective_principal()
            ));
            if searching {
                return Ok(Outcome::Entries(EntryCursor::empty()));
            }
            return Err(Error::abort(NAME, "insufficient access rights"));
        }
        if destination.as_ref().is_some_and(|d| inside(d)) {
            return Err(Error::abort(NAME, "insufficient access rights"));
        }
        // Renaming or moving an ancestor carries the protected subtree along.
        let relocates = matches!(
            request.kind(),
            OperationKind::Move | OperationKind::MoveAndRename | OperationKind::Rename
        );
        if relocates && protected.iter().any(|p| p.is_within(&target)) {
            request.log().info(format_args!(
                "denied to {}: subtree holds protected entries",
                request.session().effective_principal()
            ));
            return Err(Error::abort(NAME, "insufficient access rights"));
        }
        if !searching {
            return next.proceed(request);
        }

        match next.proceed(request)? {
            Outcome::Entries(cursor) => Ok(Outcome::Entries(cursor.retain(move |entry| {
                n.normalize_dn(entry.dn())
                    .map(|dn| !protected.iter().any(|p| dn.is_within(p)))
                    .unwrap_or(false)
            }))),
            other => Ok(other),
        }
    }
}
