//! Lazy, forward-only result sequences for list and search.

use std::fmt;
use std::iter::FusedIterator;
use std::time::{Duration, Instant};

use crate::entry::Entry;
use crate::error::{Error, Limit, Result};
use crate::request::ResultLimits;

/// A boxed source of entries, as produced by a backend.
pub type EntryStream = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Pulls entries from a backend stream while enforcing size and time
/// limits.
///
/// The cursor is fused: after it ends, reports an error, or is closed, it
/// yields `None` forever.
///
/// - Reaching the size limit ends the cursor with one
///   `Error::LimitExceeded(Limit::Size(_))` if the source still had entries,
///   or plainly if it did not.
/// - Passing the time limit (measured from when limits were applied) ends it
///   with one `Error::LimitExceeded(Limit::Time(_))`.
/// - A source error is yielded once, then the cursor ends.
///
/// # Examples
///
/// ```
/// use directory_core::{Dn, Entry, EntryCursor, Error, ResultLimits};
///
/// let entries = (0..10).map(|i| Entry::new(Dn::parse(&format!("cn=u{i},o=acme")).unwrap()));
/// let mut cursor = EntryCursor::from_entries(entries.collect())
///     .with_limits(&ResultLimits { size: Some(3), time: None });
///
/// assert_eq!(cursor.by_ref().take(3).filter(|r| r.is_ok()).count(), 3);
/// assert!(matches!(cursor.next(), Some(Err(Error::LimitExceeded(_)))));
/// assert!(cursor.next().is_none());
/// ```
pub struct EntryCursor {
    source: Option<EntryStream>,
    size_limit: Option<usize>,
    time_limit: Option<(Duration, Instant)>,
    returned: usize,
}

impl EntryCursor {
    /// Wraps a stream with no limits.
    pub fn new(source: impl Iterator<Item = Result<Entry>> + Send + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            size_limit: None,
            time_limit: None,
            returned: 0,
        }
    }

    /// A cursor over an in-memory list.
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self::new(entries.into_iter().map(Ok))
    }

    /// A cursor that yields nothing.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Applies limits; the time limit clock starts now.
    pub fn with_limits(mut self, limits: &ResultLimits) -> Self {
        self.size_limit = limits.size;
        self.time_limit = limits.time.map(|d| (d, Instant::now()));
        self
    }

    /// Drops entries for which `keep` is false. Filtering happens before the
    /// limits are counted.
    pub fn retain<F>(mut self, mut keep: F) -> Self
    where
        F: FnMut(&Entry) -> bool + Send + 'static,
    {
        if let Some(source) = self.source.take() {
            self.source = Some(Box::new(source.filter(move |item| match item {
                Ok(entry) => keep(entry),
                Err(_) => true,
            })));
        }
        self
    }

    /// Rewrites each entry as it is pulled.
    pub fn map_entries<F>(mut self, f: F) -> Self
    where
        F: FnMut(Entry) -> Entry + Send + 'static,
    {
        if let Some(source) = self.source.take() {
            let mut f = f;
            self.source = Some(Box::new(source.map(move |item| item.map(&mut f))));
        }
        self
    }

    /// Releases the source. Closing twice is harmless.
    pub fn close(&mut self) {
        self.source = None;
    }

    /// True once the cursor has ended for any reason.
    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Entries handed out so far.
    pub fn returned(&self) -> usize {
        self.returned
    }
}

impl Iterator for EntryCursor {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.source.as_mut()?;

        if let Some((limit, started)) = self.time_limit {
            if started.elapsed() >= limit {
                self.source = None;
                return Some(Err(Error::LimitExceeded(Limit::Time(limit))));
            }
        }

        if let Some(limit) = self.size_limit {
            if self.returned >= limit {
                let more = source.next().is_some();
                self.source = None;
                return more.then_some(Err(Error::LimitExceeded(Limit::Size(limit))));
            }
        }

        match source.next() {
            Some(Ok(entry)) => {
                self.returned += 1;
                Some(Ok(entry))
            }
            Some(Err(e)) => {
                self.source = None;
                Some(Err(e))
            }
            None => {
                self.source = None;
                None
            }
        }
    }
}

impl FusedIterator for EntryCursor {}

impl fmt::Debug for EntryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCursor")
            .field("closed", &self.is_closed())
            .field("size_limit", &self.size_limit)
            .field("time_limit", &self.time_limit.map(|(d, _)| d))
            .field("returned", &self.returned)
            .finish()
    }
}
