//! Storage backends the interceptor chain delegates to.
//!
//! The chain's terminal step calls exactly one [`Backend`] method per
//! request, passing the payload as the stages left it.

mod memory;

pub use memory::MemoryBackend;

use crate::cursor::EntryStream;
use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::Result;
use crate::filter::Filter;
use crate::request::{Scope, Searching};
use crate::value::Value;

/// Entry storage.
///
/// Implementations are shared by every session, so they must be safe to
/// call concurrently. Failures should be reported as `Error::Backend`; the
/// dispatcher passes them to the caller unchanged and never retries.
pub trait Backend: Send + Sync {
    /// Stores a new entry.
    ///
    /// # Errors
    ///
    /// `EntryAlreadyExists` if the DN is taken, `NoSuchObject` if the parent
    /// is missing.
    fn add(&self, entry: &Entry) -> Result<()>;

    /// Removes a leaf entry.
    ///
    /// # Errors
    ///
    /// `NoSuchObject` or `NotAllowedOnNonLeaf`.
    fn delete(&self, dn: &Dn) -> Result<()>;

    /// Applies modifications atomically.
    ///
    /// # Errors
    ///
    /// `NoSuchObject`, or the first modification that cannot be applied.
    fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<()>;

    /// Moves an entry, with its subtree, below `new_parent`.
    ///
    /// # Errors
    ///
    /// `NoSuchObject` for a missing source or parent, `EntryAlreadyExists`
    /// if the destination is taken.
    fn move_entry(&self, dn: &Dn, new_parent: &Dn) -> Result<()>;

    /// Moves and renames in one step.
    ///
    /// # Errors
    ///
    /// As [`move_entry`](Self::move_entry).
    fn move_and_rename(
        &self,
        dn: &Dn,
        new_parent: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()>;

    /// Renames in place.
    ///
    /// # Errors
    ///
    /// As [`move_entry`](Self::move_entry).
    fn rename(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<()>;

    /// Returns whether the entry holds `value` in `attribute`.
    ///
    /// # Errors
    ///
    /// `NoSuchObject`, or a normalization error for the assertion.
    fn compare(&self, dn: &Dn, attribute: &str, value: &Value) -> Result<bool>;

    /// Immediate children of `dn`.
    ///
    /// # Errors
    ///
    /// `NoSuchObject` if `dn` is missing.
    fn list(&self, dn: &Dn, searching: &Searching) -> Result<EntryStream>;

    /// Reads one entry, keeping only `attributes` when non-empty.
    ///
    /// # Errors
    ///
    /// `NoSuchObject`.
    fn lookup(&self, dn: &Dn, attributes: &[String]) -> Result<Entry>;

    /// Entries within `scope` of `base` matching `filter`.
    ///
    /// # Errors
    ///
    /// `NoSuchObject` if the base is missing.
    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        searching: &Searching,
    ) -> Result<EntryStream>;
}
