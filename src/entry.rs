//! Directory entries and modifications.

use std::collections::BTreeMap;

use crate::dn::Dn;
use crate::error::{Error, Result};
use crate::value::Value;

/// A directory entry: a DN plus multi-valued attributes.
///
/// Attribute ids are matched case-insensitively. Values of one attribute
/// keep their insertion order and never repeat.
///
/// # Examples
///
/// ```
/// use directory_core::{Dn, Entry};
///
/// let entry = Entry::new(Dn::parse("cn=alice,o=acme").unwrap())
///     .with("objectClass", "person")
///     .with("cn", "alice")
///     .with("CN", "Alice Smith");
/// assert_eq!(entry.get("cn").map(|v| v.len()), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    attributes: BTreeMap<String, Vec<Value>>,
}

impl Entry {
    /// Creates an entry with no attributes.
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds a value, builder style.
    pub fn with(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.add(attribute, value);
        self
    }

    /// Adds a value unless it is already present.
    pub fn add(&mut self, attribute: &str, value: impl Into<Value>) {
        let value = value.into();
        let values = self.attributes.entry(key(attribute)).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Replaces every value of `attribute`. An empty list removes it.
    pub fn set(&mut self, attribute: &str, values: Vec<Value>) {
        if values.is_empty() {
            self.attributes.remove(&key(attribute));
        } else {
            self.attributes.insert(key(attribute), dedup(values));
        }
    }

    /// Removes an attribute, returning its values.
    pub fn remove(&mut self, attribute: &str) -> Option<Vec<Value>> {
        self.attributes.remove(&key(attribute))
    }

    /// Values of `attribute`.
    pub fn get(&self, attribute: &str) -> Option<&[Value]> {
        self.attributes.get(&key(attribute)).map(Vec::as_slice)
    }

    /// Whether `attribute` is present.
    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains_key(&key(attribute))
    }

    /// The entry's name.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Renames the entry.
    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    /// Attribute ids (lower-cased) and their values.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Keeps the attributes whose id satisfies `keep`.
    pub fn retain_attributes(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.attributes.retain(|k, _| keep(k));
    }

    /// Applies one modification.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` when a removal names a value the entry does
    /// not hold.
    pub fn apply(&mut self, modification: &Modification) -> Result<()> {
        let attribute = modification.attribute.as_str();
        match modification.op {
            ModificationOp::Add => {
                for value in &modification.values {
                    self.add(attribute, value.clone());
                }
            }
            ModificationOp::Replace => self.set(attribute, modification.values.clone()),
            ModificationOp::Remove if modification.values.is_empty() => {
                self.remove(attribute);
            }
            ModificationOp::Remove => {
                let values = self
                    .attributes
                    .get_mut(&key(attribute))
                    .ok_or_else(|| no_such_value(attribute))?;
                for value in &modification.values {
                    let at = values
                        .iter()
                        .position(|v| v == value)
                        .ok_or_else(|| no_such_value(attribute))?;
                    values.remove(at);
                }
                if values.is_empty() {
                    self.attributes.remove(&key(attribute));
                }
            }
        }
        Ok(())
    }
}

fn no_such_value(attribute: &str) -> Error {
    Error::invalid_request(format!("no such value for attribute '{}'", attribute))
}

fn key(attribute: &str) -> String {
    attribute.trim().to_ascii_lowercase()
}

fn dedup(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// How a [`Modification`] changes an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationOp {
    /// Add the values
    Add,
    /// Remove the values, or the whole attribute when none are given
    Remove,
    /// Replace all values
    Replace,
}

/// One change within a modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// The change kind
    pub op: ModificationOp,
    /// Attribute id
    pub attribute: String,
    /// Values involved
    pub values: Vec<Value>,
}

impl Modification {
    /// Adds `values` to `attribute`.
    pub fn add(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            op: ModificationOp::Add,
            attribute: attribute.into(),
            values,
        }
    }

    /// Removes `values` (or everything) from `attribute`.
    pub fn remove(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            op: ModificationOp::Remove,
            attribute: attribute.into(),
            values,
        }
    }

    /// Replaces `attribute` with `values`.
    pub fn replace(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            op: ModificationOp::Replace,
            attribute: attribute.into(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        Entry::new(Dn::parse("cn=bob,o=acme").unwrap())
            .with("cn", "bob")
            .with("mail", "bob@acme.test")
            .with("mail", "b@acme.test")
    }

    #[test]
    fn duplicate_values_are_ignored() {
        let e = entry().with("MAIL", "bob@acme.test");
        assert_eq!(e.get("mail").unwrap().len(), 2);
    }

    #[test]
    fn modifications_apply_in_order() {
        let mut e = entry();
        e.apply(&Modification::add("sn", vec!["Builder".into()])).unwrap();
        e.apply(&Modification::remove("mail", vec!["b@acme.test".into()]))
            .unwrap();
        e.apply(&Modification::replace("cn", vec!["robert".into()]))
            .unwrap();
        assert_eq!(e.get("sn").unwrap(), &[Value::from("Builder")]);
        assert_eq!(e.get("mail").unwrap(), &[Value::from("bob@acme.test")]);
        assert_eq!(e.get("cn").unwrap(), &[Value::from("robert")]);
    }

    #[test]
    fn removing_last_value_drops_attribute() {
        let mut e = entry();
        e.apply(&Modification::remove("cn", vec!["bob".into()])).unwrap();
        assert!(!e.contains("cn"));
        e.apply(&Modification::remove("mail", vec![])).unwrap();
        assert!(!e.contains("mail"));
    }

    #[test]
    fn removing_missing_value_fails() {
        let mut e = entry();
        let err = e
            .apply(&Modification::remove("cn", vec!["alice".into()]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn retain_attributes_filters_by_id() {
        let mut e = entry();
        e.retain_attributes(|id| id == "cn");
        assert!(e.contains("CN"));
        assert!(!e.contains("mail"));
    }
}
