//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use directory_core::{
    AuthenticationLevel, CoreSession, DirectoryService, Dn, Entry, Error, Interceptor,
    InterceptorChain, MemoryBackend, Next, OperationRequest, Outcome, Principal, Result,
    SchemaHandle, SchemaRegistry,
};

pub fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

pub fn admin() -> Principal {
    Principal::new(dn("uid=admin,ou=system"), AuthenticationLevel::Simple)
}

pub fn user(name: &str) -> Principal {
    Principal::new(dn(name), AuthenticationLevel::Simple)
}

pub fn schema() -> SchemaHandle {
    SchemaHandle::new(SchemaRegistry::core())
}

/// A service with the standard chain and an empty in-memory backend.
pub fn service() -> (DirectoryService, Arc<MemoryBackend>) {
    let schema = schema();
    let backend = Arc::new(MemoryBackend::new(schema.clone()));
    let service = DirectoryService::builder("test", schema, backend.clone()).build();
    (service, backend)
}

/// A service running `chain` instead of the standard stages.
pub fn service_with(chain: InterceptorChain) -> (DirectoryService, Arc<MemoryBackend>) {
    let schema = schema();
    let backend = Arc::new(MemoryBackend::new(schema.clone()));
    let service = DirectoryService::builder("test", schema, backend.clone())
        .chain(chain)
        .build();
    (service, backend)
}

/// `o=acme` with `ou=people` holding `count` people named `user0`, `user1`, ...
pub fn populate(session: &CoreSession, count: usize) {
    session
        .add(Entry::new(dn("o=acme")).with("objectClass", "organization").with("o", "acme"))
        .unwrap();
    session
        .add(
            Entry::new(dn("ou=people,o=acme"))
                .with("objectClass", "organizationalUnit")
                .with("ou", "people"),
        )
        .unwrap();
    for i in 0..count {
        session
            .add(
                Entry::new(dn(&format!("uid=user{},ou=people,o=acme", i)))
                    .with("objectClass", "person")
                    .with("uid", format!("user{}", i))
                    .with("cn", format!("User {}", i))
                    .with("sn", "Member"),
            )
            .unwrap();
    }
}

/// Records every request that reaches it, then passes it on.
#[derive(Clone)]
pub struct Recorder {
    name: String,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Interceptor for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
        self.seen.lock().unwrap().push(request.to_string());
        next.proceed(request)
    }
}

/// Counts visits and aborts every request.
#[derive(Clone, Default)]
pub struct Refuse {
    pub hits: Arc<AtomicUsize>,
}

impl Refuse {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Interceptor for Refuse {
    fn name(&self) -> &str {
        "refuse"
    }

    fn process(&self, _request: OperationRequest, _next: Next<'_>) -> Result<Outcome> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Err(Error::abort("refuse", "not today"))
    }
}

/// Logs to the test writer; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
