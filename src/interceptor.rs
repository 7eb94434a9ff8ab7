//! The interceptor chain every operation passes through.
//!
//! Stages are held in a fixed, ordered list. Dispatch calls stage 0 with the
//! request and a [`Next`] continuation bound to stage 1; the continuation of
//! the last stage calls the [`Backend`]. A stage can:
//!
//! - pass the request through: `next.proceed(request)`
//! - transform it first: `next.proceed(rewritten)`
//! - short-circuit: return an [`Outcome`] without calling `next`
//! - abort: return an error, so no later stage and not the backend runs
//!
//! `Next::proceed` consumes the continuation, so a stage reaches the rest of
//! the chain at most once per request.

use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::cursor::EntryCursor;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::request::{Operation, OperationRequest};

/// The result of a dispatched operation.
#[derive(Debug)]
pub enum Outcome {
    /// A mutating operation completed
    Done,
    /// Result of a compare
    Compared(bool),
    /// Result of a lookup
    Entry(Entry),
    /// Lazy results of a list or search
    Entries(EntryCursor),
}

impl Outcome {
    /// Short name of the variant, for logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Done => "done",
            Outcome::Compared(_) => "compared",
            Outcome::Entry(_) => "entry",
            Outcome::Entries(_) => "entries",
        }
    }

    /// Expects [`Outcome::Done`].
    ///
    /// # Errors
    ///
    /// `Error::UnexpectedOutcome` for any other variant.
    pub fn into_done(self, operation: &'static str) -> Result<()> {
        match self {
            Outcome::Done => Ok(()),
            other => Err(other.unexpected(operation)),
        }
    }

    /// Expects [`Outcome::Compared`].
    ///
    /// # Errors
    ///
    /// `Error::UnexpectedOutcome` for any other variant.
    pub fn into_compared(self, operation: &'static str) -> Result<bool> {
        match self {
            Outcome::Compared(matched) => Ok(matched),
            other => Err(other.unexpected(operation)),
        }
    }

    /// Expects [`Outcome::Entry`].
    ///
    /// # Errors
    ///
    /// `Error::UnexpectedOutcome` for any other variant.
    pub fn into_entry(self, operation: &'static str) -> Result<Entry> {
        match self {
            Outcome::Entry(entry) => Ok(entry),
            other => Err(other.unexpected(operation)),
        }
    }

    /// Expects [`Outcome::Entries`].
    ///
    /// # Errors
    ///
    /// `Error::UnexpectedOutcome` for any other variant.
    pub fn into_entries(self, operation: &'static str) -> Result<EntryCursor> {
        match self {
            Outcome::Entries(cursor) => Ok(cursor),
            other => Err(other.unexpected(operation)),
        }
    }

    fn unexpected(&self, operation: &'static str) -> Error {
        Error::UnexpectedOutcome {
            operation,
            outcome: self.label(),
        }
    }
}

/// One named stage of the chain.
///
/// Stages hold no per-request state and must be safe to apply to a request
/// they have already processed.
pub trait Interceptor: Send + Sync {
    /// Name used for logging and de-duplication.
    fn name(&self) -> &str;

    /// Handles `request`, calling `next` to continue down the chain.
    ///
    /// # Errors
    ///
    /// A stage aborts by returning an error; errors from `next` should be
    /// returned as they are.
    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome>;
}

/// Continuation to the remaining stages and the backend.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Interceptor>],
    position: usize,
    backend: &'a dyn Backend,
}

impl<'a> Next<'a> {
    /// Index of the stage this continuation will enter; equal to the chain
    /// length when only the backend remains.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Runs the rest of the chain.
    ///
    /// # Errors
    ///
    /// Whatever a later stage or the backend reports.
    pub fn proceed(self, request: OperationRequest) -> Result<Outcome> {
        let Some(stage) = self.stages.get(self.position) else {
            return invoke_backend(self.backend, request);
        };
        let span = tracing::debug_span!("stage", stage = stage.name(), position = self.position);
        let _entered = span.enter();
        let next = Next {
            stages: self.stages,
            position: self.position + 1,
            backend: self.backend,
        };
        stage.process(request, next).inspect_err(|e| {
            if let Error::StageAbort { stage, reason } = e {
                tracing::debug!(stage = %stage, reason = %reason, "operation aborted");
            }
        })
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("position", &self.position)
            .field("stages", &self.stages.len())
            .finish()
    }
}

fn invoke_backend(backend: &dyn Backend, request: OperationRequest) -> Result<Outcome> {
    let dn = request.dn();
    let outcome = match request.operation() {
        Operation::Add { entry } => backend.add(entry).map(|_| Outcome::Done),
        Operation::Delete => backend.delete(dn).map(|_| Outcome::Done),
        Operation::Modify { modifications } => {
            backend.modify(dn, modifications).map(|_| Outcome::Done)
        }
        Operation::Move { new_parent } => backend.move_entry(dn, new_parent).map(|_| Outcome::Done),
        Operation::MoveAndRename {
            new_parent,
            new_rdn,
            delete_old_rdn,
        } => backend
            .move_and_rename(dn, new_parent, new_rdn, *delete_old_rdn)
            .map(|_| Outcome::Done),
        Operation::Rename {
            new_rdn,
            delete_old_rdn,
        } => backend
            .rename(dn, new_rdn, *delete_old_rdn)
            .map(|_| Outcome::Done),
        Operation::Compare { attribute, value } => {
            backend.compare(dn, attribute, value).map(Outcome::Compared)
        }
        Operation::List { searching } => backend.list(dn, searching).map(|stream| {
            Outcome::Entries(EntryCursor::new(stream).with_limits(&searching.limits))
        }),
        Operation::Lookup { attributes } => backend.lookup(dn, attributes).map(Outcome::Entry),
        Operation::Search {
            scope,
            filter,
            searching,
        } => backend
            .search(dn, *scope, filter, searching)
            .map(|stream| Outcome::Entries(EntryCursor::new(stream).with_limits(&searching.limits))),
    };
    outcome.inspect_err(|e| {
        if let Error::Backend(inner) = e {
            request.log().warn(format_args!("backend failed: {}", inner));
        }
    })
}

/// An immutable, ordered list of stages.
///
/// # Examples
///
/// ```
/// use directory_core::{Interceptor, InterceptorChain, Next, OperationRequest, Outcome, Result};
///
/// struct Audit;
///
/// impl Interceptor for Audit {
///     fn name(&self) -> &str {
///         "audit"
///     }
///
///     fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
///         request.log().info(format_args!("{}", request));
///         next.proceed(request)
///     }
/// }
///
/// let chain = InterceptorChain::builder().with(Audit).with(Audit).build();
/// assert_eq!(chain.names(), vec!["audit"]);
/// ```
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Arc<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    /// Starts an empty builder.
    pub fn builder() -> ChainBuilder {
        ChainBuilder { stages: Vec::new() }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if requests go straight to the backend.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs `request` through every stage and then `backend`.
    ///
    /// # Errors
    ///
    /// The first error any stage or the backend returns. Stages after the
    /// failing one are not entered; nothing is rolled back.
    pub fn dispatch(&self, request: OperationRequest, backend: &dyn Backend) -> Result<Outcome> {
        let span = tracing::debug_span!(
            "dispatch",
            operation = request.kind().label(),
            dn = %request.dn(),
            session = request.session().id(),
        );
        let _entered = span.enter();
        Next {
            stages: self.stages.as_slice(),
            position: 0,
            backend,
        }
        .proceed(request)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Builder for [`InterceptorChain`].
pub struct ChainBuilder {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
    /// Appends a stage. A stage whose name is already present is ignored.
    pub fn with(self, stage: impl Interceptor + 'static) -> Self {
        self.with_shared(Arc::new(stage))
    }

    /// Appends a shared stage, de-duplicating by name like [`with`](Self::with).
    pub fn with_shared(mut self, stage: Arc<dyn Interceptor>) -> Self {
        if !self.stages.iter().any(|s| s.name() == stage.name()) {
            self.stages.push(stage);
        }
        self
    }

    /// Freezes the stage order.
    pub fn build(self) -> InterceptorChain {
        InterceptorChain {
            stages: Arc::new(self.stages),
        }
    }
}

impl fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::dn::Dn;
    use crate::principal::Principal;
    use crate::schema::{SchemaHandle, SchemaRegistry};
    use crate::session::SessionContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        abort: bool,
    }

    impl Interceptor for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
            self.seen.lock().unwrap().push(self.name);
            if self.abort {
                return Err(Error::abort(self.name, "refused"));
            }
            next.proceed(request)
        }
    }

    struct ShortCircuit(AtomicUsize);

    impl Interceptor for ShortCircuit {
        fn name(&self) -> &str {
            "short-circuit"
        }

        fn process(&self, _request: OperationRequest, _next: Next<'_>) -> Result<Outcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Entries(EntryCursor::empty()))
        }
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new(SchemaHandle::new(SchemaRegistry::core()))
    }

    fn lookup_root() -> OperationRequest {
        let ctx = SessionContext::new(1, "test", Principal::anonymous());
        OperationRequest::lookup(ctx, Dn::root(), vec![]).unwrap()
    }

    fn recorder(name: &'static str, seen: &Arc<Mutex<Vec<&'static str>>>, abort: bool) -> Recorder {
        Recorder {
            name,
            seen: Arc::clone(seen),
            abort,
        }
    }

    #[test]
    fn stages_run_in_order_then_backend() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::builder()
            .with(recorder("a", &seen, false))
            .with(recorder("b", &seen, false))
            .with(recorder("c", &seen, false))
            .build();
        let outcome = chain.dispatch(lookup_root(), &backend()).unwrap();
        assert!(matches!(outcome, Outcome::Entry(_)));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn abort_skips_later_stages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::builder()
            .with(recorder("a", &seen, false))
            .with(recorder("b", &seen, true))
            .with(recorder("c", &seen, false))
            .build();
        let err = chain.dispatch(lookup_root(), &backend()).unwrap_err();
        assert!(matches!(err, Error::StageAbort { ref stage, .. } if stage == "b"));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn short_circuit_never_reaches_backend() {
        let stage = Arc::new(ShortCircuit(AtomicUsize::new(0)));
        let chain = InterceptorChain::builder()
            .with_shared(stage.clone())
            .build();
        let ctx = SessionContext::new(1, "test", Principal::anonymous());
        // The backend has no such entry, so reaching it would fail.
        let request = OperationRequest::list(ctx)
            .base(Dn::parse("o=missing").unwrap())
            .build()
            .unwrap();
        let cursor = chain
            .dispatch(request, &backend())
            .unwrap()
            .into_entries("list")
            .unwrap();
        assert_eq!(cursor.count(), 0);
        assert_eq!(stage.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_deduplicates_by_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::builder()
            .with(recorder("a", &seen, false))
            .with(recorder("a", &seen, true))
            .build();
        assert_eq!(chain.len(), 1);
        assert!(chain.dispatch(lookup_root(), &backend()).is_ok());
    }

    #[test]
    fn mismatched_outcome_is_an_error() {
        let err = Outcome::Done.into_entry("lookup").unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedOutcome {
                operation: "lookup",
                outcome: "done"
            }
        ));
    }
}
