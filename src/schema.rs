//! Read-only schema registry consumed by the normalization service.
//!
//! A [`SchemaRegistry`] is immutable once built. [`SchemaHandle`] publishes
//! whole registries: readers take a snapshot at the start of a request and
//! keep it for the request's duration, while an administrative reload swaps
//! in a new registry without touching the one readers already hold.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::normalizer::{
    DeepTrimNormalizer, DeepTrimToLowerNormalizer, NoOpNormalizer, Normalizer,
    NumericStringNormalizer,
};

/// A schema matching rule and the normalizer it supplies.
#[derive(Debug, Clone)]
pub struct MatchingRule {
    oid: String,
    name: String,
    normalizer: Arc<dyn Normalizer>,
}

impl MatchingRule {
    /// Creates a matching rule.
    pub fn new(
        oid: impl Into<String>,
        name: impl Into<String>,
        normalizer: impl Normalizer + 'static,
    ) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            normalizer: Arc::new(normalizer),
        }
    }

    /// Numeric identifier of the rule.
    pub fn oid(&self) -> &str {
        &self.oid
    }

    /// Short name of the rule.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rule's value normalizer.
    pub fn normalizer(&self) -> &dyn Normalizer {
        self.normalizer.as_ref()
    }
}

/// Attribute type descriptor.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use directory_core::{AttributeType, DeepTrimToLowerNormalizer, MatchingRule};
///
/// let case_ignore = Arc::new(MatchingRule::new("2.5.13.2", "caseIgnoreMatch", DeepTrimToLowerNormalizer));
/// let cn = AttributeType::new("2.5.4.3")
///     .name("cn")
///     .name("commonName")
///     .equality(case_ignore);
///
/// assert_eq!(cn.primary_name(), "cn");
/// assert!(cn.is_human_readable());
/// ```
#[derive(Debug, Clone)]
pub struct AttributeType {
    oid: String,
    names: Vec<String>,
    human_readable: bool,
    user_modifiable: bool,
    equality: Option<Arc<MatchingRule>>,
}

impl AttributeType {
    /// Creates a human-readable, user-modifiable type with no names and no
    /// equality rule.
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            names: Vec::new(),
            human_readable: true,
            user_modifiable: true,
            equality: None,
        }
    }

    /// Adds a short name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Marks values of this type as binary.
    pub fn binary(mut self) -> Self {
        self.human_readable = false;
        self
    }

    /// Marks this type as operational (not user-modifiable).
    pub fn operational(mut self) -> Self {
        self.user_modifiable = false;
        self
    }

    /// Sets the equality matching rule.
    pub fn equality(mut self, rule: Arc<MatchingRule>) -> Self {
        self.equality = Some(rule);
        self
    }

    /// Numeric identifier.
    pub fn oid(&self) -> &str {
        &self.oid
    }

    /// All short names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The first short name, or the OID when the type has none.
    pub fn primary_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }

    /// Whether values are text.
    pub fn is_human_readable(&self) -> bool {
        self.human_readable
    }

    /// Whether clients may write this attribute.
    pub fn is_user_modifiable(&self) -> bool {
        self.user_modifiable
    }

    /// The equality matching rule, if any.
    pub fn equality_rule(&self) -> Option<&MatchingRule> {
        self.equality.as_deref()
    }
}

/// Immutable attribute type registry, keyed by OID and by lower-cased name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    by_oid: HashMap<String, Arc<AttributeType>>,
    oids_by_name: HashMap<String, String>,
}

impl SchemaRegistry {
    /// Starts building a registry.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// A small registry holding the standard naming, person and operational
    /// attribute types.
    pub fn core() -> Self {
        let mut registry = Self::default();
        for at in core_attribute_types() {
            registry.insert(at);
        }
        registry
    }

    fn insert(&mut self, at: AttributeType) {
        let oid = key(&at.oid);
        for name in &at.names {
            self.oids_by_name.insert(key(name), oid.clone());
        }
        self.by_oid.insert(oid, Arc::new(at));
    }

    /// Resolves a short name or an OID.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownAttributeType` if nothing matches.
    pub fn lookup(&self, id: &str) -> Result<Arc<AttributeType>> {
        let k = key(id);
        let oid = if is_numeric_oid(&k) {
            Some(&k)
        } else {
            self.oids_by_name.get(&k)
        };
        oid.and_then(|oid| self.by_oid.get(oid))
            .cloned()
            .ok_or_else(|| Error::unknown_attribute(id))
    }

    /// Resolves a numeric OID only; short names do not match.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownAttributeType` if `oid` is not registered.
    pub fn lookup_by_oid(&self, oid: &str) -> Result<Arc<AttributeType>> {
        self.by_oid
            .get(&key(oid))
            .cloned()
            .ok_or_else(|| Error::unknown_attribute(oid))
    }

    /// Returns true if `id` names or numbers a registered type.
    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_ok()
    }

    /// Returns the OID registered for a short name (or echoes a known OID).
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownAttributeType` if `name` is not registered.
    pub fn oid_for_name(&self, name: &str) -> Result<String> {
        self.lookup(name).map(|at| at.oid.clone())
    }

    /// Number of registered attribute types.
    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    /// Returns true if the registry holds no types.
    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }
}

/// Collects attribute types and validates them into a [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<AttributeType>,
}

impl SchemaBuilder {
    /// Seeds the builder with every type of `registry`.
    pub fn extend_from(mut self, registry: &SchemaRegistry) -> Self {
        self.types
            .extend(registry.by_oid.values().map(|at| at.as_ref().clone()));
        self
    }

    /// Adds an attribute type.
    pub fn attribute_type(mut self, at: AttributeType) -> Self {
        self.types.push(at);
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if an OID is malformed or an OID or
    /// name is registered twice.
    pub fn build(self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::default();
        for at in self.types {
            let oid = key(&at.oid);
            if !is_numeric_oid(&oid) {
                return Err(Error::configuration(format!(
                    "'{}' is not a numeric OID",
                    at.oid
                )));
            }
            if registry.by_oid.contains_key(&oid) {
                return Err(Error::configuration(format!(
                    "attribute type {} registered twice",
                    at.oid
                )));
            }
            if let Some(name) = at
                .names
                .iter()
                .find(|n| registry.oids_by_name.contains_key(&key(n)))
            {
                return Err(Error::configuration(format!(
                    "attribute name '{}' registered twice",
                    name
                )));
            }
            registry.insert(at);
        }
        Ok(registry)
    }
}

/// Shared, swappable reference to the current schema registry.
#[derive(Debug, Clone)]
pub struct SchemaHandle {
    current: Arc<RwLock<Arc<SchemaRegistry>>>,
}

impl SchemaHandle {
    /// Wraps an initial registry.
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// The registry readers should use for one request.
    pub fn snapshot(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.current.read())
    }

    /// Publishes a new registry. Snapshots already taken are unaffected.
    pub fn publish(&self, registry: SchemaRegistry) {
        let types = registry.len();
        *self.current.write() = Arc::new(registry);
        tracing::info!(attribute_types = types, "published schema registry");
    }
}

fn key(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

fn is_numeric_oid(s: &str) -> bool {
    !s.is_empty()
        && s.split('.')
            .all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit()))
}

fn rule(oid: &str, name: &str, normalizer: Arc<dyn Normalizer>) -> Arc<MatchingRule> {
    Arc::new(MatchingRule {
        oid: oid.to_string(),
        name: name.to_string(),
        normalizer,
    })
}

fn text(oid: &str, names: &[&str], equality: &Arc<MatchingRule>) -> AttributeType {
    names
        .iter()
        .fold(AttributeType::new(oid), |at, n| at.name(*n))
        .equality(Arc::clone(equality))
}

fn core_attribute_types() -> Vec<AttributeType> {
    let oid_match = rule(
        "2.5.13.0",
        "objectIdentifierMatch",
        Arc::new(DeepTrimToLowerNormalizer),
    );
    let dn_match = rule(
        "2.5.13.1",
        "distinguishedNameMatch",
        Arc::new(DeepTrimToLowerNormalizer),
    );
    let case_ignore = rule(
        "2.5.13.2",
        "caseIgnoreMatch",
        Arc::new(DeepTrimToLowerNormalizer),
    );
    let numeric = rule(
        "2.5.13.8",
        "numericStringMatch",
        Arc::new(NumericStringNormalizer),
    );
    let octets = rule("2.5.13.17", "octetStringMatch", Arc::new(NoOpNormalizer));
    let time = rule(
        "2.5.13.27",
        "generalizedTimeMatch",
        Arc::new(DeepTrimNormalizer),
    );
    let ia5_ignore = rule(
        "1.3.6.1.4.1.1466.109.114.2",
        "caseIgnoreIA5Match",
        Arc::new(DeepTrimToLowerNormalizer),
    );

    vec![
        text("2.5.4.0", &["objectClass"], &oid_match),
        text("2.5.4.3", &["cn", "commonName"], &case_ignore),
        text("2.5.4.4", &["sn", "surname"], &case_ignore),
        text("2.5.4.6", &["c", "countryName"], &case_ignore),
        text("2.5.4.7", &["l", "localityName"], &case_ignore),
        text("2.5.4.10", &["o", "organizationName"], &case_ignore),
        text("2.5.4.11", &["ou", "organizationalUnitName"], &case_ignore),
        text("2.5.4.13", &["description"], &case_ignore),
        text("2.5.4.25", &["internationaliSDNNumber"], &numeric),
        text("2.5.4.31", &["member"], &dn_match),
        text("2.5.4.35", &["userPassword"], &octets).binary(),
        text("0.9.2342.19200300.100.1.1", &["uid", "userid"], &case_ignore),
        text("0.9.2342.19200300.100.1.3", &["mail", "rfc822Mailbox"], &ia5_ignore),
        text("0.9.2342.19200300.100.1.25", &["dc", "domainComponent"], &ia5_ignore),
        AttributeType::new("0.9.2342.19200300.100.1.60")
            .name("jpegPhoto")
            .binary(),
        text("2.16.840.1.113730.3.1.3", &["employeeNumber"], &case_ignore),
        text("2.5.18.1", &["createTimestamp"], &time).operational(),
        text("2.5.18.2", &["modifyTimestamp"], &time).operational(),
        text("2.5.18.3", &["creatorsName"], &dn_match).operational(),
        text("2.5.18.4", &["modifiersName"], &dn_match).operational(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        let registry = SchemaRegistry::core();
        let at = registry.lookup("CommonName").unwrap();
        assert_eq!(at.oid(), "2.5.4.3");
        assert_eq!(registry.lookup(" CN ").unwrap().oid(), "2.5.4.3");
    }

    #[test]
    fn lookup_accepts_oid() {
        let registry = SchemaRegistry::core();
        assert_eq!(registry.lookup("2.5.4.11").unwrap().primary_name(), "ou");
    }

    #[test]
    fn lookup_by_oid_rejects_names() {
        let registry = SchemaRegistry::core();
        assert!(registry.lookup_by_oid("2.5.4.3").is_ok());
        let err = registry.lookup_by_oid("cn").unwrap_err();
        assert!(matches!(err, Error::UnknownAttributeType { id } if id == "cn"));
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        let registry = SchemaRegistry::core();
        assert!(!registry.contains("favouriteDrink"));
        assert!(registry.contains("mail"));
        assert!(registry.oid_for_name("favouriteDrink").is_err());
        assert_eq!(registry.oid_for_name("dc").unwrap(), "0.9.2342.19200300.100.1.25");
    }

    #[test]
    fn binary_types_are_flagged() {
        let registry = SchemaRegistry::core();
        assert!(!registry.lookup("userPassword").unwrap().is_human_readable());
        assert!(registry.lookup("jpegPhoto").unwrap().equality_rule().is_none());
        assert!(!registry.lookup("createTimestamp").unwrap().is_user_modifiable());
    }

    #[test]
    fn builder_rejects_duplicates() {
        let err = SchemaRegistry::builder()
            .attribute_type(AttributeType::new("1.2.3").name("a"))
            .attribute_type(AttributeType::new("1.2.4").name("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = SchemaRegistry::builder()
            .attribute_type(AttributeType::new("1.2.3"))
            .attribute_type(AttributeType::new("1.2.3"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn builder_rejects_non_numeric_oid() {
        let err = SchemaRegistry::builder()
            .attribute_type(AttributeType::new("cn"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn snapshots_survive_publication() {
        let handle = SchemaHandle::new(SchemaRegistry::core());
        let before = handle.snapshot();

        let extended = SchemaRegistry::builder()
            .extend_from(&before)
            .attribute_type(AttributeType::new("1.3.6.1.4.1.99999.1").name("favouriteDrink"))
            .build()
            .unwrap();
        handle.publish(extended);

        assert!(!before.contains("favouriteDrink"));
        assert!(handle.snapshot().contains("favouriteDrink"));
    }
}
