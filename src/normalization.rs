//! Schema-driven canonicalization of attribute values and names.

use std::sync::Arc;

use crate::dn::{escape_value, is_escapable, Ava, Dn, Rdn};
use crate::error::{Error, Result};
use crate::normalizer::{NoOpNormalizer, Normalizer};
use crate::schema::{AttributeType, SchemaRegistry};
use crate::value::Value;

/// Normalizes name components and attribute values against one schema
/// snapshot.
///
/// The service holds no mutable state: it can be shared freely between
/// sessions, and every call sees the same registry.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use directory_core::{NameComponentNormalizer, SchemaRegistry, Value};
///
/// let normalizer = NameComponentNormalizer::new(Arc::new(SchemaRegistry::core()));
///
/// let cn = normalizer.normalize_by_name("cn", "  John   SMITH ").unwrap();
/// assert_eq!(cn, Value::from("john smith"));
///
/// // Binary attributes decode backslash-hex escapes first.
/// let password = normalizer.normalize_by_name("userPassword", "\\41\\42").unwrap();
/// assert_eq!(password, Value::from(b"AB".to_vec()));
/// ```
#[derive(Debug, Clone)]
pub struct NameComponentNormalizer {
    registry: Arc<SchemaRegistry>,
}

impl NameComponentNormalizer {
    /// Creates a normalizer over a registry snapshot.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// The registry snapshot in use.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Normalizes a textual value of the type named `name` (a short name or
    /// an OID).
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` if `name` does not resolve,
    /// `Error::Encoding` if a binary type receives a malformed escape.
    pub fn normalize_by_name(&self, name: &str, value: &str) -> Result<Value> {
        let at = self.registry.lookup(name)?;
        normalize_text(&at, value)
    }

    /// Normalizes a raw value of the type named `name`.
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` if `name` does not resolve,
    /// `Error::Encoding` if a human-readable type receives non-UTF-8 bytes.
    pub fn normalize_bytes_by_name(&self, name: &str, value: &[u8]) -> Result<Value> {
        let at = self.registry.lookup(name)?;
        normalize_bytes(&at, value)
    }

    /// Normalizes a textual value of the type numbered `oid`.
    ///
    /// # Errors
    ///
    /// As [`normalize_by_name`](Self::normalize_by_name); short names are
    /// not accepted here.
    pub fn normalize_by_oid(&self, oid: &str, value: &str) -> Result<Value> {
        let at = self.registry.lookup_by_oid(oid)?;
        normalize_text(&at, value)
    }

    /// Normalizes a raw value of the type numbered `oid`.
    ///
    /// # Errors
    ///
    /// As [`normalize_bytes_by_name`](Self::normalize_bytes_by_name); short
    /// names are not accepted here.
    pub fn normalize_bytes_by_oid(&self, oid: &str, value: &[u8]) -> Result<Value> {
        let at = self.registry.lookup_by_oid(oid)?;
        normalize_bytes(&at, value)
    }

    /// Normalizes an already-typed value of the type named `id`.
    ///
    /// # Errors
    ///
    /// As the text and byte entry points.
    pub fn normalize_value(&self, id: &str, value: &Value) -> Result<Value> {
        match value {
            Value::Text(s) => self.normalize_by_name(id, s),
            Value::Binary(b) => self.normalize_bytes_by_name(id, b),
        }
    }

    /// Returns true if `id` is a known attribute type. Never fails.
    pub fn is_defined(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Resolves the OID of a short name.
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` if `name` does not resolve.
    pub fn oid_for_name(&self, name: &str) -> Result<String> {
        self.registry.oid_for_name(name)
    }

    /// Canonical identifier for an attribute description (its OID).
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` if `id` does not resolve.
    pub fn normalize_attribute_id(&self, id: &str) -> Result<String> {
        self.oid_for_name(id)
    }

    /// Normalizes every component of `dn`: types become OIDs, values take
    /// their matching rule's canonical form, and multi-valued RDNs are
    /// sorted. Applying it to an already-normalized DN changes nothing.
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` or `Error::Encoding` from any component.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use directory_core::{Dn, NameComponentNormalizer, SchemaRegistry};
    ///
    /// let normalizer = NameComponentNormalizer::new(Arc::new(SchemaRegistry::core()));
    /// let dn = Dn::parse("CN = John  Smith , OU=People,o=ACME").unwrap();
    ///
    /// let normalized = normalizer.normalize_dn(&dn).unwrap();
    /// assert_eq!(normalized.to_string(), "2.5.4.3=john smith,2.5.4.11=people,2.5.4.10=acme");
    /// assert_eq!(normalizer.normalize_dn(&normalized).unwrap(), normalized);
    /// ```
    pub fn normalize_dn(&self, dn: &Dn) -> Result<Dn> {
        let rdns = dn
            .rdns()
            .iter()
            .map(|rdn| self.normalize_rdn(rdn))
            .collect::<Result<Vec<_>>>()?;
        Ok(Dn::from_normalized(rdns, dn.user_form().to_string()))
    }

    /// Normalizes one RDN.
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` or `Error::Encoding`.
    pub fn normalize_rdn(&self, rdn: &Rdn) -> Result<Rdn> {
        let mut avas = rdn
            .avas()
            .iter()
            .map(|ava| self.normalize_ava(ava))
            .collect::<Result<Vec<_>>>()?;
        avas.sort();
        avas.dedup();
        Ok(Rdn::from_avas(avas))
    }

    fn normalize_ava(&self, ava: &Ava) -> Result<Ava> {
        let at = self.registry.lookup(ava.attr_type())?;
        let raw = unescape(ava.escaped_value())?;
        let value = normalize_bytes(&at, &raw)?;
        let escaped = match &value {
            Value::Text(s) => escape_value(s),
            Value::Binary(_) => value.to_string(),
        };
        Ok(Ava::from_escaped(at.oid(), escaped))
    }
}

fn normalizer_for(at: &AttributeType) -> &dyn Normalizer {
    // Types without an equality rule compare their values as given.
    match at.equality_rule() {
        Some(rule) => rule.normalizer(),
        None => &NoOpNormalizer,
    }
}

fn normalize_text(at: &AttributeType, value: &str) -> Result<Value> {
    if at.is_human_readable() {
        normalizer_for(at).normalize(&Value::from(value))
    } else {
        let bytes = unescape(value).inspect_err(|e| {
            tracing::error!(attribute = at.oid(), error = %e, "cannot convert value of binary attribute to bytes");
        })?;
        normalizer_for(at).normalize(&Value::Binary(bytes))
    }
}

fn normalize_bytes(at: &AttributeType, value: &[u8]) -> Result<Value> {
    if at.is_human_readable() {
        let text = std::str::from_utf8(value).map_err(|e| {
            tracing::error!(attribute = at.oid(), error = %e, "value of human-readable attribute is not UTF-8");
            Error::encoding(format!(
                "value of human-readable attribute {} is not UTF-8: {}",
                at.primary_name(),
                e
            ))
        })?;
        normalizer_for(at).normalize(&Value::from(text))
    } else {
        normalizer_for(at).normalize(&Value::from(value))
    }
}

/// Reverses backslash escaping: `\` followed by two hex digits becomes one
/// byte, `\` followed by a DN special character becomes that character, and
/// everything else is copied through as UTF-8.
///
/// # Errors
///
/// `Error::Encoding` for a dangling `\`, a single hex digit, or a `\`
/// followed by any other character.
pub fn unescape(value: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some(high) if high.is_ascii_hexdigit() => {
                let low = chars
                    .next()
                    .filter(char::is_ascii_hexdigit)
                    .ok_or_else(|| Error::encoding(format!("incomplete hex escape in '{}'", value)))?;
                out.push(hex_pair(high, low));
            }
            Some(special) if is_escapable(special) => out.push(special as u8),
            Some(other) => {
                return Err(Error::encoding(format!(
                    "invalid escape '\\{}' in '{}'",
                    other, value
                )))
            }
            None => return Err(Error::encoding(format!("dangling escape in '{}'", value))),
        }
    }
    Ok(out)
}

fn hex_pair(high: char, low: char) -> u8 {
    let digit = |c: char| c.to_digit(16).unwrap_or(0) as u8;
    (digit(high) << 4) | digit(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> NameComponentNormalizer {
        NameComponentNormalizer::new(Arc::new(SchemaRegistry::core()))
    }

    #[test]
    fn human_readable_text_is_normalized_directly() {
        let n = normalizer();
        assert_eq!(
            n.normalize_by_name("ou", " Sales  Team").unwrap(),
            Value::from("sales team")
        );
    }

    #[test]
    fn human_readable_bytes_are_decoded_first() {
        let n = normalizer();
        assert_eq!(
            n.normalize_bytes_by_name("cn", "ÉMILE".as_bytes()).unwrap(),
            Value::from("émile")
        );
    }

    #[test]
    fn human_readable_bad_utf8_is_encoding_error() {
        let err = normalizer()
            .normalize_bytes_by_name("cn", &[0xc3, 0x28])
            .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }

    #[test]
    fn binary_text_is_unescaped_then_normalized() {
        let n = normalizer();
        let escaped = n.normalize_by_name("userPassword", r"\41\42").unwrap();
        let raw = n.normalize_bytes_by_name("userPassword", &[0x41, 0x42]).unwrap();
        assert_eq!(escaped, raw);
        assert_eq!(raw, Value::from(b"AB".to_vec()));
    }

    #[test]
    fn binary_text_copies_plain_characters() {
        let n = normalizer();
        assert_eq!(
            n.normalize_by_name("jpegPhoto", r"x\00y").unwrap(),
            Value::from(vec![b'x', 0, b'y'])
        );
    }

    #[test]
    fn binary_text_with_bad_escape_is_encoding_error() {
        let err = normalizer()
            .normalize_by_name("userPassword", r"\4")
            .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }

    #[test]
    fn missing_equality_rule_falls_back_to_identity() {
        let n = normalizer();
        let photo = vec![0xff, 0xd8, 0xff];
        assert_eq!(
            n.normalize_bytes_by_name("jpegPhoto", &photo).unwrap(),
            Value::from(photo)
        );
    }

    #[test]
    fn unknown_type_fails_for_every_entry_point() {
        let n = normalizer();
        let unknown = |r: Result<Value>| matches!(r, Err(Error::UnknownAttributeType { .. }));
        assert!(unknown(n.normalize_by_name("favouriteDrink", "tea")));
        assert!(unknown(n.normalize_bytes_by_name("favouriteDrink", b"tea")));
        assert!(unknown(n.normalize_by_oid("1.2.3.4.5", "tea")));
        assert!(unknown(n.normalize_bytes_by_oid("1.2.3.4.5", b"tea")));
    }

    #[test]
    fn oid_entry_points_reject_short_names() {
        let n = normalizer();
        assert!(n.normalize_by_oid("2.5.4.3", "x").is_ok());
        assert!(matches!(
            n.normalize_by_oid("cn", "x"),
            Err(Error::UnknownAttributeType { .. })
        ));
    }

    #[test]
    fn defined_probe_never_fails() {
        let n = normalizer();
        assert!(n.is_defined("CN"));
        assert!(n.is_defined("2.5.4.3"));
        assert!(!n.is_defined(""));
        assert!(!n.is_defined("no such thing"));
    }

    #[test]
    fn dn_values_with_specials_survive_normalization() {
        let n = normalizer();
        let dn = Dn::parse(r"cn=Smith\, JOHN,o=Acme").unwrap();
        let normalized = n.normalize_dn(&dn).unwrap();
        assert_eq!(normalized.to_string(), r"2.5.4.3=smith\, john,2.5.4.10=acme");
        assert!(normalized.is_normalized());
        assert_eq!(n.normalize_dn(&normalized).unwrap(), normalized);
    }

    #[test]
    fn dn_binary_values_render_as_hex_and_stay_stable() {
        let n = normalizer();
        let dn = Dn::parse(r"userPassword=\41B,o=Acme").unwrap();
        let normalized = n.normalize_dn(&dn).unwrap();
        assert_eq!(
            normalized.rdns()[0].avas()[0].escaped_value(),
            r"\41\42"
        );
        assert_eq!(n.normalize_dn(&normalized).unwrap(), normalized);
    }

    #[test]
    fn multi_valued_rdn_order_is_canonical() {
        let n = normalizer();
        let a = n.normalize_dn(&Dn::parse("uid=bob+cn=Bob,o=Acme").unwrap()).unwrap();
        let b = n.normalize_dn(&Dn::parse("CN=bob+UID=BOB,o=acme").unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_dn_component_fails() {
        let err = normalizer()
            .normalize_dn(&Dn::parse("favouriteDrink=tea,o=Acme").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAttributeType { .. }));
    }

    #[test]
    fn unescape_handles_specials_and_hex() {
        assert_eq!(unescape(r"a\,b\2Cc").unwrap(), b"a,b,c".to_vec());
        assert!(unescape("trailing\\").is_err());
        assert!(unescape(r"\q").is_err());
    }
}
