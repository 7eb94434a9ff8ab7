//! Operation dispatch core for an LDAP-style directory service.
//!
//! This crate provides:
//! - **Sessions**: [`CoreSession`] turns caller arguments into typed
//!   [`OperationRequest`]s bound to a [`SessionContext`] snapshot
//! - **Interceptor chain**: an ordered [`InterceptorChain`] of named stages,
//!   each able to rewrite, short-circuit or abort a request before the
//!   [`Backend`] sees it
//! - **Normalization**: [`NameComponentNormalizer`] maps attribute names to
//!   OIDs and values to their matching rule's canonical form
//!
//! # Core Types
//!
//! - [`DirectoryService`]: schema, chain and backend shared by all sessions
//! - [`OperationRequest`] / [`Operation`]: one request per operation kind
//! - [`Interceptor`] / [`Next`]: the stage contract and its continuation
//! - [`Outcome`] / [`EntryCursor`]: results, with lazy entry streams
//! - [`Dn`], [`Filter`], [`Entry`], [`Value`]: the directory data model
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use directory_core::{
//!     AuthenticationLevel, DirectoryService, Dn, Entry, MemoryBackend, Principal,
//!     SchemaHandle, SchemaRegistry,
//! };
//!
//! let schema = SchemaHandle::new(SchemaRegistry::core());
//! let backend = Arc::new(MemoryBackend::new(schema.clone()));
//! let service = DirectoryService::builder("example", schema, backend).build();
//!
//! let admin = Principal::new(Dn::parse("uid=admin,ou=system").unwrap(), AuthenticationLevel::Simple);
//! let session = service.session(admin);
//! session.add(Entry::new(Dn::parse("o=Acme").unwrap()).with("o", "Acme")).unwrap();
//!
//! // Names compare in normalized form.
//! assert!(session.compare(&Dn::parse("O = ACME").unwrap(), "organizationName", "acme").unwrap());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod codec;
mod config;
mod cursor;
mod dn;
mod entry;
mod error;
mod filter;
mod interceptor;
mod logging;
mod normalization;
mod normalizer;
mod principal;
mod request;
mod schema;
mod service;
mod session;
mod stages;
mod value;

pub use backend::{Backend, MemoryBackend};
pub use codec::{
    encode_frame, FrameDecoder, PayloadDecoder, RawPayload, DEFAULT_MAX_FRAME_LENGTH,
    LENGTH_PREFIX,
};
pub use config::{AccessControlConfig, AuthenticationConfig, DirectoryConfig, ReferralConfig};
pub use cursor::{EntryCursor, EntryStream};
pub use dn::{escape_value, Ava, Dn, Rdn};
pub use entry::{Entry, Modification, ModificationOp};
pub use error::{BackendError, BackendErrorKind, Error, Limit, Result};
pub use filter::{Assertion, ExtensibleAssertion, Filter, SubstringAssertion, MAX_FILTER_DEPTH};
pub use interceptor::{ChainBuilder, Interceptor, InterceptorChain, Next, Outcome};
pub use logging::OperationLog;
pub use normalization::{unescape, NameComponentNormalizer};
pub use normalizer::{
    DeepTrimNormalizer, DeepTrimToLowerNormalizer, NoOpNormalizer, Normalizer,
    NumericStringNormalizer,
};
pub use principal::{AuthenticationLevel, Credentials, Principal};
pub use request::{
    AliasDeref, ListBuilder, Operation, OperationKind, OperationRequest, RequestDefaults,
    ResultLimits, Scope, SearchBuilder, Searching,
};
pub use schema::{AttributeType, MatchingRule, SchemaBuilder, SchemaHandle, SchemaRegistry};
pub use service::{DirectoryService, ServiceBuilder};
pub use session::{CoreSession, ReferralHandlingMode, SessionContext};
pub use stages::{
    build_chain, standard_chain, AccessControlStage, AuthenticationStage, NormalizationStage,
    OperationalAttributeStage, ReferralStage, StageKind,
};
pub use value::Value;
