//! Typed operation requests.
//!
//! Every request carries the same header (owning session, target DN, kind)
//! and one kind-specific payload. Requests are consumed by dispatch and
//! cannot be cloned, so a request is never dispatched twice.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::logging::OperationLog;
use crate::session::SessionContext;
use crate::value::Value;

/// The ten operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Add an entry
    Add,
    /// Delete a leaf entry
    Delete,
    /// Change attributes
    Modify,
    /// Move under a new parent
    Move,
    /// Move and change the RDN at once
    MoveAndRename,
    /// Change the RDN
    Rename,
    /// Test an attribute value
    Compare,
    /// Enumerate immediate children
    List,
    /// Read one entry
    Lookup,
    /// Filtered search
    Search,
}

impl OperationKind {
    /// Stable label used in logs and by kind-indifferent stages.
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Delete => "delete",
            OperationKind::Modify => "modify",
            OperationKind::Move => "move",
            OperationKind::MoveAndRename => "moveAndRename",
            OperationKind::Rename => "rename",
            OperationKind::Compare => "compare",
            OperationKind::List => "list",
            OperationKind::Lookup => "lookup",
            OperationKind::Search => "search",
        }
    }

    /// Whether the operation changes the directory.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Add
                | OperationKind::Delete
                | OperationKind::Modify
                | OperationKind::Move
                | OperationKind::MoveAndRename
                | OperationKind::Rename
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Search scope relative to the base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// The base entry only
    Object,
    /// Immediate children of the base
    OneLevel,
    /// The base and everything below it
    Subtree,
}

/// When aliases are dereferenced during list and search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AliasDeref {
    /// Never dereference
    #[default]
    Never,
    /// While searching below the base
    InSearching,
    /// When locating the base
    FindingBase,
    /// Always
    Always,
}

/// Result bounds for list and search. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultLimits {
    /// Maximum number of entries returned
    pub size: Option<usize>,
    /// Maximum time spent producing entries
    pub time: Option<Duration>,
}

/// Defaults applied when a caller leaves an optional request field unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestDefaults {
    /// Alias policy for list and search
    pub alias_deref: AliasDeref,
    /// Limits for list and search
    pub limits: ResultLimits,
}

/// Fields shared by list and search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Searching {
    /// Alias dereferencing policy
    pub alias_deref: AliasDeref,
    /// Requested attribute ids; empty means all user attributes
    pub attributes: Vec<String>,
    /// Size and time limits
    pub limits: ResultLimits,
}

/// Kind-specific request payload.
#[derive(Debug, PartialEq, Eq)]
pub enum Operation {
    /// The entry to add; its DN is the request target
    Add {
        /// Entry data
        entry: Entry,
    },
    /// Remove the target
    Delete,
    /// Apply modifications in order
    Modify {
        /// Non-empty list of changes
        modifications: Vec<Modification>,
    },
    /// Move the target under `new_parent`
    Move {
        /// Destination parent
        new_parent: Dn,
    },
    /// Move and rename together
    MoveAndRename {
        /// Destination parent
        new_parent: Dn,
        /// Replacement RDN
        new_rdn: Rdn,
        /// Whether the old RDN values are removed from the entry
        delete_old_rdn: bool,
    },
    /// Rename in place
    Rename {
        /// Replacement RDN
        new_rdn: Rdn,
        /// Whether the old RDN values are removed from the entry
        delete_old_rdn: bool,
    },
    /// Test whether the target holds `value` in `attribute`
    Compare {
        /// Attribute id
        attribute: String,
        /// Asserted value
        value: Value,
    },
    /// List the target's children
    List {
        /// Alias policy, attributes and limits
        searching: Searching,
    },
    /// Read the target
    Lookup {
        /// Requested attribute ids; empty means all
        attributes: Vec<String>,
    },
    /// Search from the target
    Search {
        /// How far below the base to look
        scope: Scope,
        /// Entry filter
        filter: Filter,
        /// Alias policy, attributes and limits
        searching: Searching,
    },
}

impl Operation {
    /// The kind of this payload.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Add { .. } => OperationKind::Add,
            Operation::Delete => OperationKind::Delete,
            Operation::Modify { .. } => OperationKind::Modify,
            Operation::Move { .. } => OperationKind::Move,
            Operation::MoveAndRename { .. } => OperationKind::MoveAndRename,
            Operation::Rename { .. } => OperationKind::Rename,
            Operation::Compare { .. } => OperationKind::Compare,
            Operation::List { .. } => OperationKind::List,
            Operation::Lookup { .. } => OperationKind::Lookup,
            Operation::Search { .. } => OperationKind::Search,
        }
    }

    fn searching_mut(&mut self) -> Option<&mut Searching> {
        match self {
            Operation::List { searching } | Operation::Search { searching, .. } => Some(searching),
            _ => None,
        }
    }
}

/// One operation on behalf of a session.
///
/// # Examples
///
/// ```
/// use directory_core::{Dn, OperationKind, OperationRequest, Principal, SessionContext};
///
/// let ctx = SessionContext::new(1, "test", Principal::anonymous());
/// let request = OperationRequest::delete(ctx, Dn::parse("cn=bob,o=acme").unwrap()).unwrap();
/// assert_eq!(request.kind(), OperationKind::Delete);
/// assert_eq!(request.kind().label(), "delete");
/// ```
#[derive(Debug)]
pub struct OperationRequest {
    session: SessionContext,
    dn: Dn,
    operation: Operation,
}

impl OperationRequest {
    fn new(session: SessionContext, dn: Dn, operation: Operation) -> Result<Self> {
        let kind = operation.kind();
        if dn.is_root() && kind.is_mutating() {
            return Err(Error::invalid_request(format!(
                "{} requires a non-empty target DN",
                kind
            )));
        }
        Ok(Self {
            session,
            dn,
            operation,
        })
    }

    /// Add request; the target is the entry's DN.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` if the entry has the root DN.
    pub fn add(session: SessionContext, entry: Entry) -> Result<Self> {
        let dn = entry.dn().clone();
        Self::new(session, dn, Operation::Add { entry })
    }

    /// Delete request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for the root DN.
    pub fn delete(session: SessionContext, dn: Dn) -> Result<Self> {
        Self::new(session, dn, Operation::Delete)
    }

    /// Modify request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for the root DN or an empty modification list.
    pub fn modify(session: SessionContext, dn: Dn, modifications: Vec<Modification>) -> Result<Self> {
        if modifications.is_empty() {
            return Err(Error::invalid_request("modify requires at least one modification"));
        }
        Self::new(session, dn, Operation::Modify { modifications })
    }

    /// Move request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for the root DN.
    pub fn move_entry(session: SessionContext, dn: Dn, new_parent: Dn) -> Result<Self> {
        Self::new(session, dn, Operation::Move { new_parent })
    }

    /// Move-and-rename request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for the root DN.
    pub fn move_and_rename(
        session: SessionContext,
        dn: Dn,
        new_parent: Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
    ) -> Result<Self> {
        Self::new(
            session,
            dn,
            Operation::MoveAndRename {
                new_parent,
                new_rdn,
                delete_old_rdn,
            },
        )
    }

    /// Rename request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for the root DN.
    pub fn rename(session: SessionContext, dn: Dn, new_rdn: Rdn, delete_old_rdn: bool) -> Result<Self> {
        Self::new(
            session,
            dn,
            Operation::Rename {
                new_rdn,
                delete_old_rdn,
            },
        )
    }

    /// Compare request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` if `attribute` is blank.
    pub fn compare(
        session: SessionContext,
        dn: Dn,
        attribute: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let attribute = attribute.into();
        if attribute.trim().is_empty() {
            return Err(Error::invalid_request("compare requires an attribute"));
        }
        Self::new(
            session,
            dn,
            Operation::Compare {
                attribute,
                value: value.into(),
            },
        )
    }

    /// Lookup request. The root DN is allowed.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible like the other constructors.
    pub fn lookup(session: SessionContext, dn: Dn, attributes: Vec<String>) -> Result<Self> {
        Self::new(session, dn, Operation::Lookup { attributes })
    }

    /// Starts a search request.
    pub fn search(session: SessionContext) -> SearchBuilder {
        SearchBuilder {
            session,
            base: None,
            scope: None,
            filter: None,
            alias_deref: None,
            attributes: Vec::new(),
            limits: None,
        }
    }

    /// Starts a list request.
    pub fn list(session: SessionContext) -> ListBuilder {
        ListBuilder {
            session,
            base: None,
            alias_deref: None,
            attributes: Vec::new(),
            limits: None,
        }
    }

    /// Sets the size limit of a list or search. Zero means unlimited.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for any other operation kind.
    pub fn set_size_limit(&mut self, limit: usize) -> Result<()> {
        let kind = self.kind();
        let searching = self
            .operation
            .searching_mut()
            .ok_or_else(|| Error::invalid_request(format!("{} has no size limit", kind)))?;
        searching.limits.size = (limit > 0).then_some(limit);
        Ok(())
    }

    /// Sets the time limit of a list or search. Zero means unlimited.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for any other operation kind.
    pub fn set_time_limit(&mut self, limit: Duration) -> Result<()> {
        let kind = self.kind();
        let searching = self
            .operation
            .searching_mut()
            .ok_or_else(|| Error::invalid_request(format!("{} has no time limit", kind)))?;
        searching.limits.time = (!limit.is_zero()).then_some(limit);
        Ok(())
    }

    /// The owning session snapshot.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// The target DN.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// The payload.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Replaces the target DN.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` if `dn` is the root DN and the operation
    /// mutates.
    pub fn with_dn(self, dn: Dn) -> Result<Self> {
        Self::new(self.session, dn, self.operation)
    }

    /// Replaces the payload with one of the same kind.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` if the kinds differ.
    pub fn with_operation(mut self, operation: Operation) -> Result<Self> {
        if operation.kind() != self.kind() {
            return Err(Error::invalid_request(format!(
                "cannot turn a {} request into {}",
                self.kind(),
                operation.kind()
            )));
        }
        self.operation = operation;
        Ok(self)
    }

    /// Splits the request so a stage can rebuild its payload.
    pub fn into_parts(self) -> (SessionContext, Dn, Operation) {
        (self.session, self.dn, self.operation)
    }

    /// Reassembles a request from [`into_parts`](Self::into_parts).
    ///
    /// # Errors
    ///
    /// As the per-kind constructors.
    pub fn from_parts(session: SessionContext, dn: Dn, operation: Operation) -> Result<Self> {
        Self::new(session, dn, operation)
    }

    /// Logger bound to this request.
    pub fn log(&self) -> OperationLog<'_> {
        OperationLog::new(self)
    }
}

impl fmt::Display for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.dn)
    }
}

/// Builder returned by [`OperationRequest::search`].
#[derive(Debug)]
pub struct SearchBuilder {
    session: SessionContext,
    base: Option<Dn>,
    scope: Option<Scope>,
    filter: Option<Filter>,
    alias_deref: Option<AliasDeref>,
    attributes: Vec<String>,
    limits: Option<ResultLimits>,
}

impl SearchBuilder {
    /// Search base (required).
    pub fn base(mut self, base: Dn) -> Self {
        self.base = Some(base);
        self
    }

    /// Search scope (required).
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Entry filter (required).
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Alias policy; defaults from the session.
    pub fn alias_deref(mut self, alias_deref: AliasDeref) -> Self {
        self.alias_deref = Some(alias_deref);
        self
    }

    /// Requested attributes.
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Result limits; default from the session.
    pub fn limits(mut self, limits: ResultLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` if base, scope or filter is missing.
    pub fn build(self) -> Result<OperationRequest> {
        let base = self
            .base
            .ok_or_else(|| Error::invalid_request("search requires a base DN"))?;
        let scope = self
            .scope
            .ok_or_else(|| Error::invalid_request("search requires a scope"))?;
        let filter = self
            .filter
            .ok_or_else(|| Error::invalid_request("search requires a filter"))?;
        let defaults = *self.session.defaults();
        let searching = Searching {
            alias_deref: self.alias_deref.unwrap_or(defaults.alias_deref),
            attributes: self.attributes,
            limits: self.limits.unwrap_or(defaults.limits),
        };
        OperationRequest::new(
            self.session,
            base,
            Operation::Search {
                scope,
                filter,
                searching,
            },
        )
    }
}

/// Builder returned by [`OperationRequest::list`].
#[derive(Debug)]
pub struct ListBuilder {
    session: SessionContext,
    base: Option<Dn>,
    alias_deref: Option<AliasDeref>,
    attributes: Vec<String>,
    limits: Option<ResultLimits>,
}

impl ListBuilder {
    /// Entry whose children are listed (required).
    pub fn base(mut self, base: Dn) -> Self {
        self.base = Some(base);
        self
    }

    /// Alias policy; defaults from the session.
    pub fn alias_deref(mut self, alias_deref: AliasDeref) -> Self {
        self.alias_deref = Some(alias_deref);
        self
    }

    /// Requested attributes.
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Result limits; default from the session.
    pub fn limits(mut self, limits: ResultLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` if the base is missing.
    pub fn build(self) -> Result<OperationRequest> {
        let base = self
            .base
            .ok_or_else(|| Error::invalid_request("list requires a base DN"))?;
        let defaults = *self.session.defaults();
        let searching = Searching {
            alias_deref: self.alias_deref.unwrap_or(defaults.alias_deref),
            attributes: self.attributes,
            limits: self.limits.unwrap_or(defaults.limits),
        };
        OperationRequest::new(self.session, base, Operation::List { searching })
    }
}
