use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;

use super::Backend;
use crate::cursor::EntryStream;
use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification, ModificationOp};
use crate::error::{BackendError, BackendErrorKind, Error, Result};
use crate::filter::Filter;
use crate::normalization::{unescape, NameComponentNormalizer};
use crate::request::{Scope, Searching};
use crate::schema::{SchemaHandle, SchemaRegistry};
use crate::value::Value;

/// A backend that keeps every entry in memory.
///
/// Entries are keyed by their normalized DN and attribute ids are stored
/// under the attribute type's primary name, so `cn` and `commonName` land in
/// the same place. Matching uses the schema's normalizers.
///
/// # Examples
///
/// ```
/// use directory_core::{Backend, Dn, Entry, MemoryBackend, SchemaHandle, SchemaRegistry};
///
/// let backend = MemoryBackend::new(SchemaHandle::new(SchemaRegistry::core()));
/// backend.add(&Entry::new(Dn::parse("o=Acme").unwrap()).with("o", "Acme")).unwrap();
///
/// assert!(backend.compare(&Dn::parse("O=ACME").unwrap(), "organizationName", &"acme".into()).unwrap());
/// ```
pub struct MemoryBackend {
    schema: SchemaHandle,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new(schema: SchemaHandle) -> Self {
        Self {
            schema,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns true if an entry named `dn` exists.
    ///
    /// # Errors
    ///
    /// A normalization error for `dn`.
    pub fn contains(&self, dn: &Dn) -> Result<bool> {
        let dn = self.normalizer().normalize_dn(dn)?;
        Ok(self.entries.read().contains_key(&key(&dn)))
    }

    fn normalizer(&self) -> NameComponentNormalizer {
        NameComponentNormalizer::new(self.schema.snapshot())
    }

    fn relocate(
        &self,
        dn: &Dn,
        new_parent: Option<&Dn>,
        new_rdn: Option<&Rdn>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let matcher = Matcher::new(self.normalizer());
        let n = &matcher.normalizer;
        let dn = n.normalize_dn(dn)?;
        let old_rdn = dn
            .rdn()
            .cloned()
            .ok_or_else(|| Error::invalid_request("the root entry cannot be moved"))?;
        let parent = match new_parent {
            Some(p) => n.normalize_dn(p)?,
            None => dn.parent().unwrap_or_else(Dn::root),
        };
        let rdn = match new_rdn {
            Some(r) => n.normalize_rdn(r)?,
            None => old_rdn.clone(),
        };
        let target = n.normalize_dn(&parent.child(rdn.clone()))?;

        let mut entries = self.entries.write();
        if !entries.contains_key(&key(&dn)) {
            return Err(no_such_object(&dn));
        }
        if !parent.is_root() && !entries.contains_key(&key(&parent)) {
            return Err(no_such_object(&parent));
        }
        if target != dn {
            if target.is_within(&dn) {
                return Err(Error::invalid_request(format!(
                    "cannot move '{}' below itself",
                    dn.user_form()
                )));
            }
            if entries.contains_key(&key(&target)) {
                return Err(already_exists(&target));
            }
        }

        let keys: Vec<String> = subtree(&entries, &dn)
            .into_iter()
            .map(|e| key(e.dn()))
            .collect();
        let mut moved = Vec::with_capacity(keys.len());
        for k in keys {
            if let Some(mut entry) = entries.remove(&k) {
                if let Some(renamed) = entry.dn().rebase(&dn, &target) {
                    entry.set_dn(renamed);
                }
                moved.push(entry);
            }
        }
        for mut entry in moved {
            if new_rdn.is_some() && entry.dn() == &target {
                matcher.apply_rdn(&mut entry, &old_rdn, &rdn, delete_old_rdn);
            }
            entries.insert(key(entry.dn()), entry);
        }
        tracing::debug!(from = %dn, to = %target, "entry relocated");
        Ok(())
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.len())
            .finish()
    }
}

impl Backend for MemoryBackend {
    fn add(&self, entry: &Entry) -> Result<()> {
        let n = self.normalizer();
        let dn = n.normalize_dn(entry.dn())?;
        let stored = canonical_entry(n.registry(), dn.clone(), entry);

        let mut entries = self.entries.write();
        let k = key(&dn);
        if entries.contains_key(&k) {
            return Err(already_exists(&dn));
        }
        if let Some(parent) = dn.parent() {
            if !parent.is_root() && !entries.contains_key(&key(&parent)) {
                return Err(no_such_object(&parent));
            }
        }
        entries.insert(k, stored);
        Ok(())
    }

    fn delete(&self, dn: &Dn) -> Result<()> {
        let dn = self.normalizer().normalize_dn(dn)?;
        let mut entries = self.entries.write();
        let k = key(&dn);
        if !entries.contains_key(&k) {
            return Err(no_such_object(&dn));
        }
        if subtree(&entries, &dn).len() > 1 {
            return Err(BackendError::new(
                BackendErrorKind::NotAllowedOnNonLeaf,
                format!("'{}' has children", dn.user_form()),
            )
            .into());
        }
        entries.remove(&k);
        Ok(())
    }

    fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<()> {
        let matcher = Matcher::new(self.normalizer());
        let dn = matcher.normalizer.normalize_dn(dn)?;
        let k = key(&dn);

        let mut entries = self.entries.write();
        let mut updated = entries
            .get(&k)
            .cloned()
            .ok_or_else(|| no_such_object(&dn))?;
        for modification in modifications {
            let id = matcher.id(&modification.attribute);
            let values = match modification.op {
                ModificationOp::Remove => modification
                    .values
                    .iter()
                    .map(|v| matcher.stored_value(&updated, &id, v))
                    .collect(),
                _ => modification.values.clone(),
            };
            updated.apply(&Modification {
                op: modification.op,
                attribute: id,
                values,
            })?;
        }
        entries.insert(k, updated);
        Ok(())
    }

    fn move_entry(&self, dn: &Dn, new_parent: &Dn) -> Result<()> {
        self.relocate(dn, Some(new_parent), None, false)
    }

    fn move_and_rename(
        &self,
        dn: &Dn,
        new_parent: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.relocate(dn, Some(new_parent), Some(new_rdn), delete_old_rdn)
    }

    fn rename(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<()> {
        self.relocate(dn, None, Some(new_rdn), delete_old_rdn)
    }

    fn compare(&self, dn: &Dn, attribute: &str, value: &Value) -> Result<bool> {
        let matcher = Matcher::new(self.normalizer());
        let dn = matcher.normalizer.normalize_dn(dn)?;
        let asserted = matcher.normalizer.normalize_value(attribute, value)?;
        let entries = self.entries.read();
        let entry = entries.get(&key(&dn)).ok_or_else(|| no_such_object(&dn))?;
        Ok(matcher.values(entry, attribute).contains(&asserted))
    }

    fn list(&self, dn: &Dn, searching: &Searching) -> Result<EntryStream> {
        let n = self.normalizer();
        let dn = n.normalize_dn(dn)?;
        let entries = self.entries.read();
        if !dn.is_root() && !entries.contains_key(&key(&dn)) {
            return Err(no_such_object(&dn));
        }
        let children: Vec<Entry> = subtree(&entries, &dn)
            .into_iter()
            .filter(|e| e.dn().len() == dn.len() + 1)
            .map(|e| project(n.registry(), e.clone(), &searching.attributes))
            .collect();
        Ok(Box::new(children.into_iter().map(Ok)))
    }

    fn lookup(&self, dn: &Dn, attributes: &[String]) -> Result<Entry> {
        let n = self.normalizer();
        let dn = n.normalize_dn(dn)?;
        let entries = self.entries.read();
        if dn.is_root() {
            let mut root = Entry::new(Dn::root());
            for top in entries.values().filter(|e| e.dn().len() == 1) {
                root.add("namingContexts", top.dn().user_form());
            }
            return Ok(project(n.registry(), root, attributes));
        }
        let entry = entries.get(&key(&dn)).ok_or_else(|| no_such_object(&dn))?;
        Ok(project(n.registry(), entry.clone(), attributes))
    }

    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        searching: &Searching,
    ) -> Result<EntryStream> {
        let matcher = Matcher::new(self.normalizer());
        let base = matcher.normalizer.normalize_dn(base)?;

        let candidates: Vec<Entry> = {
            let entries = self.entries.read();
            if !base.is_root() && !entries.contains_key(&key(&base)) {
                return Err(no_such_object(&base));
            }
            subtree(&entries, &base)
                .into_iter()
                .filter(|e| match scope {
                    Scope::Object => e.dn().len() == base.len(),
                    Scope::OneLevel => e.dn().len() == base.len() + 1,
                    Scope::Subtree => true,
                })
                .cloned()
                .collect()
        };

        let projector = matcher.clone();
        let filter = filter.clone();
        let attributes = searching.attributes.clone();
        Ok(Box::new(
            candidates
                .into_iter()
                .filter(move |e| matcher.matches(e, &filter))
                .map(move |e| Ok(project(projector.normalizer.registry(), e, &attributes))),
        ))
    }
}

/// Storage key: normalized RDNs from the root down, so a subtree occupies
/// one contiguous key range.
fn key(dn: &Dn) -> String {
    dn.rdns()
        .iter()
        .rev()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `dn` itself (if stored) followed by everything below it.
fn subtree<'a>(entries: &'a BTreeMap<String, Entry>, dn: &Dn) -> Vec<&'a Entry> {
    if dn.is_root() {
        return entries.values().collect();
    }
    let base = key(dn);
    let prefix = format!("{},", base);
    let mut out: Vec<&Entry> = entries.get(&base).into_iter().collect();
    out.extend(
        entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, e)| e),
    );
    out
}

fn canonical_id(registry: &SchemaRegistry, id: &str) -> String {
    registry
        .lookup(id)
        .map(|at| at.primary_name().to_ascii_lowercase())
        .unwrap_or_else(|_| id.trim().to_ascii_lowercase())
}

fn canonical_entry(registry: &SchemaRegistry, dn: Dn, entry: &Entry) -> Entry {
    let mut out = Entry::new(dn);
    for (id, values) in entry.attributes() {
        let id = canonical_id(registry, id);
        for value in values {
            out.add(&id, value.clone());
        }
    }
    out
}

fn project(registry: &SchemaRegistry, mut entry: Entry, attributes: &[String]) -> Entry {
    if attributes.is_empty() || attributes.iter().any(|a| a.trim() == "*") {
        return entry;
    }
    let wanted: Vec<String> = attributes
        .iter()
        .map(|a| canonical_id(registry, a))
        .collect();
    entry.retain_attributes(|id| wanted.iter().any(|w| w == id));
    entry
}

fn no_such_object(dn: &Dn) -> Error {
    BackendError::new(
        BackendErrorKind::NoSuchObject,
        format!("no entry named '{}'", dn.user_form()),
    )
    .into()
}

fn already_exists(dn: &Dn) -> Error {
    BackendError::new(
        BackendErrorKind::EntryAlreadyExists,
        format!("'{}' already exists", dn.user_form()),
    )
    .into()
}

fn into_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Text(s),
        Err(e) => Value::Binary(e.into_bytes()),
    }
}

/// Filter evaluation and value comparison through the schema normalizers.
/// Attribute types the schema does not know compare their raw values.
#[derive(Debug, Clone)]
struct Matcher {
    normalizer: NameComponentNormalizer,
}

impl Matcher {
    fn new(normalizer: NameComponentNormalizer) -> Self {
        Self { normalizer }
    }

    fn id(&self, attribute: &str) -> String {
        canonical_id(self.normalizer.registry(), attribute)
    }

    fn normalize(&self, id: &str, value: &Value) -> Value {
        self.normalizer
            .normalize_value(id, value)
            .unwrap_or_else(|_| value.clone())
    }

    fn values(&self, entry: &Entry, attribute: &str) -> Vec<Value> {
        let id = self.id(attribute);
        entry
            .get(&id)
            .map(|values| values.iter().map(|v| self.normalize(&id, v)).collect())
            .unwrap_or_default()
    }

    /// Filter assertion values arrive with escapes already decoded.
    fn assertion(&self, attribute: &str, value: &Value) -> Value {
        self.normalizer
            .normalize_bytes_by_name(attribute, value.as_bytes())
            .unwrap_or_else(|_| value.clone())
    }

    fn fragment(&self, attribute: &str, text: &str) -> String {
        match self
            .normalizer
            .normalize_bytes_by_name(attribute, text.as_bytes())
        {
            Ok(Value::Text(s)) => s,
            _ => text.to_string(),
        }
    }

    fn ava_value(&self, attr_type: &str, escaped: &str) -> Option<Value> {
        let raw = unescape(escaped).ok()?;
        self.normalizer.normalize_bytes_by_name(attr_type, &raw).ok()
    }

    /// The stored value equal to `value` under the matching rule, or `value`
    /// itself when none is.
    fn stored_value(&self, entry: &Entry, id: &str, value: &Value) -> Value {
        let wanted = self.normalize(id, value);
        entry
            .get(id)
            .and_then(|stored| stored.iter().find(|v| self.normalize(id, v) == wanted))
            .cloned()
            .unwrap_or_else(|| value.clone())
    }

    fn apply_rdn(&self, entry: &mut Entry, old: &Rdn, new: &Rdn, delete_old: bool) {
        if delete_old {
            for ava in old.avas().iter().filter(|a| !new.avas().contains(a)) {
                let id = self.id(ava.attr_type());
                let gone = self.ava_value(ava.attr_type(), ava.escaped_value());
                let kept: Vec<Value> = entry
                    .get(&id)
                    .unwrap_or_default()
                    .iter()
                    .filter(|v| Some(self.normalize(&id, v)) != gone)
                    .cloned()
                    .collect();
                entry.set(&id, kept);
            }
        }
        for ava in new.avas() {
            let id = self.id(ava.attr_type());
            let wanted = self.ava_value(ava.attr_type(), ava.escaped_value());
            let present = wanted
                .as_ref()
                .is_some_and(|w| self.values(entry, &id).contains(w));
            if !present {
                if let Ok(raw) = unescape(ava.escaped_value()) {
                    entry.add(&id, into_value(raw));
                }
            }
        }
    }

    fn matches(&self, entry: &Entry, filter: &Filter) -> bool {
        self.evaluate(entry, filter) == Some(true)
    }

    /// Three-valued filter evaluation; `None` is Undefined.
    fn evaluate(&self, entry: &Entry, filter: &Filter) -> Option<bool> {
        match filter {
            Filter::And(filters) => {
                let mut result = Some(true);
                for f in filters {
                    match self.evaluate(entry, f) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Filter::Or(filters) => {
                let mut result = Some(false);
                for f in filters {
                    match self.evaluate(entry, f) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Filter::Not(inner) => self.evaluate(entry, inner).map(|b| !b),
            Filter::Undefined(_) => None,
            other => Some(self.matches_item(entry, other)),
        }
    }

    fn matches_item(&self, entry: &Entry, filter: &Filter) -> bool {
        match filter {
            Filter::And(_) | Filter::Or(_) | Filter::Not(_) | Filter::Undefined(_) => {
                self.matches(entry, filter)
            }
            Filter::Equality(a) | Filter::Approx(a) => {
                let asserted = self.assertion(&a.attribute, &a.value);
                self.values(entry, &a.attribute).contains(&asserted)
            }
            Filter::GreaterOrEqual(a) => {
                let asserted = self.assertion(&a.attribute, &a.value);
                self.values(entry, &a.attribute).iter().any(|v| *v >= asserted)
            }
            Filter::LessOrEqual(a) => {
                let asserted = self.assertion(&a.attribute, &a.value);
                self.values(entry, &a.attribute).iter().any(|v| *v <= asserted)
            }
            Filter::Present(attribute) => entry.contains(&self.id(attribute)),
            Filter::Substring(s) => {
                let initial = s.initial.as_deref().map(|t| self.fragment(&s.attribute, t));
                let any: Vec<String> = s.any.iter().map(|t| self.fragment(&s.attribute, t)).collect();
                let last = s
                    .final_part
                    .as_deref()
                    .map(|t| self.fragment(&s.attribute, t));
                self.values(entry, &s.attribute).iter().any(|v| {
                    v.as_text().is_some_and(|text| {
                        substring_match(text, initial.as_deref(), &any, last.as_deref())
                    })
                })
            }
            Filter::Extensible(e) => {
                let in_attributes = match &e.attribute {
                    Some(attribute) => self
                        .values(entry, attribute)
                        .contains(&self.assertion(attribute, &e.value)),
                    None => entry.attributes().any(|(id, _)| {
                        self.values(entry, id).contains(&self.assertion(id, &e.value))
                    }),
                };
                in_attributes || (e.dn_attributes && self.dn_matches(entry, e))
            }
        }
    }

    fn dn_matches(&self, entry: &Entry, e: &crate::filter::ExtensibleAssertion) -> bool {
        entry
            .dn()
            .rdns()
            .iter()
            .flat_map(|rdn| rdn.avas())
            .any(|ava| {
                let same_type = e
                    .attribute
                    .as_deref()
                    .map_or(true, |a| self.id(a) == self.id(ava.attr_type()));
                same_type
                    && self.ava_value(ava.attr_type(), ava.escaped_value())
                        == Some(self.assertion(ava.attr_type(), &e.value))
            })
    }
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    last.map_or(true, |l| rest.ends_with(l))
}
