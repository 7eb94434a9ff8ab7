//! Distinguished names.
//!
//! A [`Dn`] is an ordered list of [`Rdn`]s, most specific first. Values are
//! kept in their escaped string form; [`crate::NameComponentNormalizer`]
//! decodes the escapes when it canonicalizes a name.
//!
//! Raw DNs compare component-by-component without any schema knowledge, so
//! code inside the pipeline only compares DNs for which
//! [`Dn::is_normalized`] holds.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::normalization::unescape;

/// Characters that must be escaped anywhere inside an attribute value.
const SPECIALS: [char; 8] = [',', '+', '"', '\\', '<', '>', ';', '='];

/// One `type=value` pair of a relative name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ava {
    attr_type: String,
    value: String,
}

impl Ava {
    /// Creates an assertion from an attribute type and an unescaped value.
    pub fn new(attr_type: impl Into<String>, value: &str) -> Self {
        Self {
            attr_type: attr_type.into(),
            value: escape_value(value),
        }
    }

    pub(crate) fn from_escaped(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr_type: attr_type.into(),
            value: value.into(),
        }
    }

    /// The attribute type as written (a short name, or an OID once normalized).
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// The value in escaped DN string form.
    pub fn escaped_value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr_type, self.value)
    }
}

/// A relative distinguished name: one or more assertions joined by `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// Creates a single-valued RDN.
    ///
    /// # Examples
    ///
    /// ```
    /// use directory_core::Rdn;
    ///
    /// let rdn = Rdn::new("cn", "Smith, John");
    /// assert_eq!(rdn.to_string(), "cn=Smith\\, John");
    /// ```
    pub fn new(attr_type: impl Into<String>, value: &str) -> Self {
        Self {
            avas: vec![Ava::new(attr_type, value)],
        }
    }

    /// Parses a single RDN such as `cn=Bob+uid=bob`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidDn` if the text is not exactly one valid RDN.
    pub fn parse(input: &str) -> Result<Self> {
        let dn = Dn::parse(input)?;
        match dn.rdns.as_slice() {
            [rdn] => Ok(rdn.clone()),
            _ => Err(invalid(input, "expected exactly one RDN")),
        }
    }

    pub(crate) fn from_avas(avas: Vec<Ava>) -> Self {
        Self { avas }
    }

    /// The assertions making up this RDN.
    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}", ava)?;
        }
        Ok(())
    }
}

/// A distinguished name.
///
/// # Examples
///
/// ```
/// use directory_core::Dn;
///
/// let dn = Dn::parse("cn=Alice, ou=People, o=Acme").unwrap();
/// assert_eq!(dn.len(), 3);
/// assert_eq!(dn.to_string(), "cn=Alice,ou=People,o=Acme");
/// assert_eq!(dn.user_form(), "cn=Alice, ou=People, o=Acme");
///
/// let base = Dn::parse("o=Acme").unwrap();
/// assert!(dn.is_within(&base));
/// ```
#[derive(Debug, Clone)]
pub struct Dn {
    rdns: Vec<Rdn>,
    user: String,
    normalized: bool,
}

impl Dn {
    /// The empty (root) DN.
    pub fn root() -> Self {
        Self {
            rdns: Vec::new(),
            user: String::new(),
            normalized: true,
        }
    }

    /// Parses DN text. RDNs are separated by `,` or `;`, multi-valued RDNs
    /// by `+`. Escapes are validated but left in place.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidDn` for empty components, missing `=`, bad
    /// attribute type characters or malformed escapes.
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self {
                user: input.to_string(),
                ..Self::root()
            });
        }

        let mut rdns = Vec::new();
        for rdn_text in split_unescaped(input, &[',', ';']) {
            let mut avas = Vec::new();
            for ava_text in split_unescaped(rdn_text, &['+']) {
                avas.push(parse_ava(input, ava_text)?);
            }
            rdns.push(Rdn { avas });
        }

        Ok(Self {
            rdns,
            user: input.to_string(),
            normalized: false,
        })
    }

    pub(crate) fn from_normalized(rdns: Vec<Rdn>, user: String) -> Self {
        Self {
            rdns,
            user,
            normalized: true,
        }
    }

    /// RDNs, most specific first.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The leftmost RDN, or `None` for the root DN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Number of RDNs.
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns true for the root DN.
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Returns true once the DN has passed through the normalization service.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// The DN exactly as the caller supplied it.
    pub fn user_form(&self) -> &str {
        &self.user
    }

    /// The DN one level up, or `None` for the root DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        let rdns = self.rdns[1..].to_vec();
        let user = render(&rdns);
        Some(Self {
            rdns,
            user,
            normalized: self.normalized,
        })
    }

    /// Returns a new DN with `rdn` prepended.
    ///
    /// The result is flagged normalized only if `self` was; the new RDN is
    /// taken as given.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        let user = render(&rdns);
        Self {
            rdns,
            user,
            normalized: false,
        }
    }

    /// Replaces the `old_base` suffix of `self` with `new_base`, or returns
    /// `None` if `self` is not within `old_base`.
    pub fn rebase(&self, old_base: &Dn, new_base: &Dn) -> Option<Dn> {
        if !self.is_within(old_base) {
            return None;
        }
        let keep = self.rdns.len() - old_base.rdns.len();
        let mut rdns = self.rdns[..keep].to_vec();
        rdns.extend(new_base.rdns.iter().cloned());
        let user = render(&rdns);
        Some(Self {
            rdns,
            user,
            normalized: self.normalized && new_base.normalized,
        })
    }

    /// Returns true if `self` equals `base` or lies below it.
    pub fn is_within(&self, base: &Dn) -> bool {
        let (n, m) = (self.rdns.len(), base.rdns.len());
        m <= n && self.rdns[n - m..] == base.rdns[..]
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rdns.hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

/// Escapes a plain value for use inside DN text.
pub fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '\0' => out.push_str("\\00"),
            c if SPECIALS.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            c => out.push(c),
        }
    }
    out
}

/// Returns true if `c` may follow a backslash as a single-character escape.
pub(crate) fn is_escapable(c: char) -> bool {
    SPECIALS.contains(&c) || c == '#' || c == ' '
}

fn render(rdns: &[Rdn]) -> String {
    rdns.iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn invalid(input: &str, reason: impl Into<String>) -> Error {
    Error::InvalidDn {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn parse_ava(input: &str, text: &str) -> Result<Ava> {
    let (attr_type, raw_value) = text
        .split_once('=')
        .ok_or_else(|| invalid(input, format!("missing '=' in '{}'", text.trim())))?;

    let attr_type = attr_type.trim();
    if attr_type.is_empty() {
        return Err(invalid(input, "empty attribute type"));
    }
    if !attr_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(invalid(
            input,
            format!("illegal attribute type '{}'", attr_type),
        ));
    }

    let value = trim_value(raw_value);
    unescape(value).map_err(|e| invalid(input, e.to_string()))?;

    Ok(Ava::from_escaped(attr_type, value))
}

// Surrounding whitespace is insignificant unless the last space is escaped.
fn trim_value(raw: &str) -> &str {
    let start = raw.trim_start();
    let end = start.trim_end();
    let trailing = end.chars().rev().take_while(|c| *c == '\\').count();
    if trailing % 2 == 1 {
        if let Some(next) = start[end.len()..].chars().next() {
            return &start[..end.len() + next.len_utf8()];
        }
    }
    end
}

fn split_unescaped<'a>(input: &'a str, separators: &[char]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if separators.contains(&c) {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_dn() {
        let dn = Dn::parse("cn=Alice,ou=People,o=Acme").unwrap();
        assert_eq!(dn.len(), 3);
        assert_eq!(dn.rdn().unwrap().avas()[0].attr_type(), "cn");
        assert_eq!(dn.rdn().unwrap().avas()[0].escaped_value(), "Alice");
        assert!(!dn.is_normalized());
    }

    #[test]
    fn parses_multi_valued_rdn_and_semicolons() {
        let dn = Dn::parse("cn=Bob+uid=bob; o=Acme").unwrap();
        assert_eq!(dn.len(), 2);
        assert_eq!(dn.rdns()[0].avas().len(), 2);
        assert_eq!(dn.to_string(), "cn=Bob+uid=bob,o=Acme");
    }

    #[test]
    fn escaped_separators_stay_in_value() {
        let dn = Dn::parse(r"cn=Smith\, John,o=Acme").unwrap();
        assert_eq!(dn.len(), 2);
        assert_eq!(dn.rdns()[0].avas()[0].escaped_value(), r"Smith\, John");
    }

    #[test]
    fn escaped_trailing_space_is_kept() {
        let dn = Dn::parse(r"cn=padded\ , o=Acme").unwrap();
        assert_eq!(dn.rdns()[0].avas()[0].escaped_value(), r"padded\ ");
    }

    #[test]
    fn empty_text_is_root() {
        let dn = Dn::parse("  ").unwrap();
        assert!(dn.is_root());
        assert_eq!(dn, Dn::root());
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["cn", "=x,o=a", "cn=a,,o=b", r"cn=a\", r"cn=\zz", "c n=x", r"cn=\4"] {
            let err = Dn::parse(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidDn { .. }), "{bad} -> {err}");
        }
    }

    #[test]
    fn parent_and_child() {
        let dn = Dn::parse("cn=Alice,o=Acme").unwrap();
        let parent = dn.parent().unwrap();
        assert_eq!(parent.to_string(), "o=Acme");
        assert_eq!(parent.child(Rdn::new("cn", "Alice")), dn);
        assert!(Dn::root().parent().is_none());
    }

    #[test]
    fn within_is_suffix_match() {
        let dn = Dn::parse("cn=Alice,ou=People,o=Acme").unwrap();
        assert!(dn.is_within(&Dn::parse("ou=People,o=Acme").unwrap()));
        assert!(dn.is_within(&dn));
        assert!(dn.is_within(&Dn::root()));
        assert!(!dn.is_within(&Dn::parse("ou=Groups,o=Acme").unwrap()));
        assert!(!Dn::parse("o=Acme").unwrap().is_within(&dn));
    }

    #[test]
    fn escape_value_marks_leading_and_trailing() {
        assert_eq!(escape_value("#x"), r"\#x");
        assert_eq!(escape_value(" a "), r"\ a\ ");
        assert_eq!(escape_value("a+b=c"), r"a\+b\=c");
    }

    #[test]
    fn rdn_parse_requires_single_component() {
        assert!(Rdn::parse("cn=a").is_ok());
        assert!(Rdn::parse("cn=a,o=b").is_err());
    }

    #[test]
    fn rebase_swaps_suffix() {
        let dn = Dn::parse("cn=a,ou=people,o=acme").unwrap();
        let moved = dn
            .rebase(&Dn::parse("ou=people,o=acme").unwrap(), &Dn::parse("ou=staff,o=acme").unwrap())
            .unwrap();
        assert_eq!(moved.to_string(), "cn=a,ou=staff,o=acme");
        assert!(dn.rebase(&Dn::parse("o=other").unwrap(), &Dn::root()).is_none());
    }
}
