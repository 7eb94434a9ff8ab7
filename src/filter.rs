//! Search filter expression trees.
//!
//! Filters are built programmatically or parsed from their RFC 4515 string
//! form, and render back to that form through `Display`.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// Deepest nesting of `&`, `|` and `!` accepted by [`Filter::parse`].
pub const MAX_FILTER_DEPTH: usize = 256;

/// An `attribute op value` assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// Attribute description
    pub attribute: String,
    /// Asserted value
    pub value: Value,
}

/// A substring assertion such as `(cn=J*n*son)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubstringAssertion {
    /// Attribute description
    pub attribute: String,
    /// Leading fragment
    pub initial: Option<String>,
    /// Middle fragments, in order
    pub any: Vec<String>,
    /// Trailing fragment
    pub final_part: Option<String>,
}

/// An extensible match such as `(cn:caseExactMatch:=Fred)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensibleAssertion {
    /// Attribute description, if given
    pub attribute: Option<String>,
    /// Matching rule identifier, if given
    pub matching_rule: Option<String>,
    /// Asserted value
    pub value: Value,
    /// Whether DN components are matched too
    pub dn_attributes: bool,
}

/// A search filter.
///
/// # Examples
///
/// ```
/// use directory_core::Filter;
///
/// let filter = Filter::parse("(&(objectClass=person)(|(cn=J*)(!(mail=*))))").unwrap();
/// assert_eq!(filter.to_string(), "(&(objectClass=person)(|(cn=J*)(!(mail=*))))");
///
/// let built = Filter::and(vec![Filter::eq("cn", "Alice"), Filter::present("mail")]);
/// assert_eq!(built.to_string(), "(&(cn=Alice)(mail=*))");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters match
    And(Vec<Filter>),
    /// At least one sub-filter matches
    Or(Vec<Filter>),
    /// The sub-filter does not match
    Not(Box<Filter>),
    /// `(attr=value)`
    Equality(Assertion),
    /// `(attr>=value)`
    GreaterOrEqual(Assertion),
    /// `(attr<=value)`
    LessOrEqual(Assertion),
    /// `(attr~=value)`
    Approx(Assertion),
    /// `(attr=*)`
    Present(String),
    /// `(attr=ini*any*fin)`
    Substring(SubstringAssertion),
    /// `(attr:rule:=value)`
    Extensible(ExtensibleAssertion),
    /// An assertion over an attribute type the schema does not know. It
    /// never matches; normalization produces it instead of failing.
    Undefined(String),
}

impl Filter {
    /// Equality assertion.
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equality(Assertion {
            attribute: attribute.into(),
            value: value.into(),
        })
    }

    /// Presence test.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present(attribute.into())
    }

    /// Conjunction.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Disjunction.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Negation. Named after the LDAP operator.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Parses the RFC 4515 string form.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` describing the first syntax error, or
    /// when nesting exceeds [`MAX_FILTER_DEPTH`].
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input,
            chars: input.char_indices().peekable(),
            depth: 0,
        };
        let filter = parser.filter()?;
        if parser.chars.peek().is_some() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Attribute descriptions named anywhere in the tree.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::And(fs) | Filter::Or(fs) => fs.iter().for_each(|f| f.collect_attributes(out)),
            Filter::Not(f) => f.collect_attributes(out),
            Filter::Equality(a)
            | Filter::GreaterOrEqual(a)
            | Filter::LessOrEqual(a)
            | Filter::Approx(a) => out.push(&a.attribute),
            Filter::Present(attr) | Filter::Undefined(attr) => out.push(attr),
            Filter::Substring(s) => out.push(&s.attribute),
            Filter::Extensible(e) => {
                if let Some(attr) = &e.attribute {
                    out.push(attr);
                }
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(fs) => write_set(f, '&', fs),
            Filter::Or(fs) => write_set(f, '|', fs),
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Equality(a) => write!(f, "({}={})", a.attribute, escape_value(&a.value)),
            Filter::GreaterOrEqual(a) => write!(f, "({}>={})", a.attribute, escape_value(&a.value)),
            Filter::LessOrEqual(a) => write!(f, "({}<={})", a.attribute, escape_value(&a.value)),
            Filter::Approx(a) => write!(f, "({}~={})", a.attribute, escape_value(&a.value)),
            Filter::Present(attr) => write!(f, "({}=*)", attr),
            Filter::Undefined(attr) => write!(f, "(undefined:{})", attr),
            Filter::Substring(s) => {
                write!(f, "({}=", s.attribute)?;
                if let Some(initial) = &s.initial {
                    f.write_str(&escape_text(initial))?;
                }
                f.write_str("*")?;
                for part in &s.any {
                    write!(f, "{}*", escape_text(part))?;
                }
                if let Some(final_part) = &s.final_part {
                    f.write_str(&escape_text(final_part))?;
                }
                f.write_str(")")
            }
            Filter::Extensible(e) => {
                f.write_str("(")?;
                if let Some(attr) = &e.attribute {
                    f.write_str(attr)?;
                }
                if e.dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = &e.matching_rule {
                    write!(f, ":{}", rule)?;
                }
                write!(f, ":={})", escape_value(&e.value))
            }
        }
    }
}

fn write_set(f: &mut fmt::Formatter<'_>, op: char, filters: &[Filter]) -> fmt::Result {
    write!(f, "({}", op)?;
    for filter in filters {
        write!(f, "{}", filter)?;
    }
    f.write_str(")")
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

fn escape_value(value: &Value) -> String {
    match value {
        Value::Text(s) => escape_text(s),
        Value::Binary(_) => value.to_string(),
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    depth: usize,
}

impl Parser<'_> {
    fn error(&mut self, reason: &str) -> Error {
        let at = self
            .chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len());
        Error::invalid_request(format!(
            "bad filter '{}' at offset {}: {}",
            self.input, at, reason
        ))
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.chars.next() {
            Some((_, c)) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", want))),
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect('(')?;
        if self.depth == MAX_FILTER_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let filter = match self.chars.peek().map(|(_, c)| *c) {
            Some('&') => {
                self.chars.next();
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.chars.next();
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.chars.next();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(')')?;
        self.depth -= 1;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        while let Some((_, '(')) = self.chars.peek() {
            filters.push(self.filter()?);
        }
        if filters.is_empty() {
            return Err(self.error("empty filter set"));
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let mut attr = String::new();
        while let Some((_, c)) = self.chars.peek() {
            match c {
                '=' | '~' | '>' | '<' | ':' | '(' | ')' => break,
                c => {
                    attr.push(*c);
                    self.chars.next();
                }
            }
        }
        let attr = attr.trim().to_string();

        match self.chars.next().map(|(_, c)| c) {
            Some('~') => {
                self.expect('=')?;
                self.assertion(attr, Filter::Approx)
            }
            Some('>') => {
                self.expect('=')?;
                self.assertion(attr, Filter::GreaterOrEqual)
            }
            Some('<') => {
                self.expect('=')?;
                self.assertion(attr, Filter::LessOrEqual)
            }
            Some(':') => self.extensible(attr),
            Some('=') => self.equality_or_substring(attr),
            _ => Err(self.error("expected a filter operator")),
        }
    }

    fn assertion(&mut self, attr: String, make: fn(Assertion) -> Filter) -> Result<Filter> {
        if attr.is_empty() {
            return Err(self.error("missing attribute description"));
        }
        let value = self.value()?;
        Ok(make(Assertion {
            attribute: attr,
            value: into_value(value),
        }))
    }

    fn equality_or_substring(&mut self, attr: String) -> Result<Filter> {
        if attr.is_empty() {
            return Err(self.error("missing attribute description"));
        }
        let mut parts = vec![Vec::new()];
        loop {
            match self.chars.peek().map(|(_, c)| *c) {
                Some('*') => {
                    self.chars.next();
                    parts.push(Vec::new());
                }
                Some(')') | None => break,
                Some(_) => {
                    let byte = self.value_byte()?;
                    if let Some(last) = parts.last_mut() {
                        last.extend(byte);
                    }
                }
            }
        }

        if parts.len() == 1 {
            let value = parts.pop().unwrap_or_default();
            return Ok(Filter::Equality(Assertion {
                attribute: attr,
                value: into_value(value),
            }));
        }
        if parts.len() == 2 && parts.iter().all(Vec::is_empty) {
            return Ok(Filter::Present(attr));
        }

        let text = |bytes: Vec<u8>| String::from_utf8_lossy(&bytes).into_owned();
        let last = parts.len() - 1;
        let mut sub = SubstringAssertion {
            attribute: attr,
            ..Default::default()
        };
        for (i, part) in parts.into_iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                sub.initial = Some(text(part));
            } else if i == last {
                sub.final_part = Some(text(part));
            } else {
                sub.any.push(text(part));
            }
        }
        Ok(Filter::Substring(sub))
    }

    fn extensible(&mut self, attr: String) -> Result<Filter> {
        // Already past the first ':'.
        let mut dn_attributes = false;
        let mut matching_rule = None;
        loop {
            let mut token = String::new();
            while let Some((_, c)) = self.chars.peek() {
                if *c == ':' || *c == '=' || *c == ')' {
                    break;
                }
                token.push(*c);
                self.chars.next();
            }
            match self.chars.next().map(|(_, c)| c) {
                Some('=') if token.is_empty() => break,
                Some(':') if token.eq_ignore_ascii_case("dn") && !dn_attributes => {
                    dn_attributes = true;
                }
                Some(':') if !token.is_empty() && matching_rule.is_none() => {
                    matching_rule = Some(token);
                }
                _ => return Err(self.error("malformed extensible match")),
            }
        }
        if attr.is_empty() && matching_rule.is_none() {
            return Err(self.error("extensible match needs an attribute or a rule"));
        }
        let value = self.value()?;
        Ok(Filter::Extensible(ExtensibleAssertion {
            attribute: (!attr.is_empty()).then_some(attr),
            matching_rule,
            value: into_value(value),
            dn_attributes,
        }))
    }

    fn value(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some((_, c)) = self.chars.peek() {
            match c {
                ')' => break,
                '*' | '(' => return Err(self.error("unescaped special character in value")),
                _ => out.extend(self.value_byte()?),
            }
        }
        Ok(out)
    }

    fn value_byte(&mut self) -> Result<Vec<u8>> {
        match self.chars.next() {
            Some((_, '\\')) => {
                let high = self.chars.next().map(|(_, c)| c);
                let low = self.chars.next().map(|(_, c)| c);
                match (high.and_then(|c| c.to_digit(16)), low.and_then(|c| c.to_digit(16))) {
                    (Some(h), Some(l)) => Ok(vec![((h << 4) | l) as u8]),
                    _ => Err(self.error("invalid escape in value")),
                }
            }
            Some((_, '(')) => Err(self.error("unescaped '(' in value")),
            Some((_, c)) => {
                let mut buf = [0u8; 4];
                Ok(c.encode_utf8(&mut buf).as_bytes().to_vec())
            }
            None => Err(self.error("unexpected end of filter")),
        }
    }
}

fn into_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Text(s),
        Err(e) => Value::Binary(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_item_kind() {
        let f = Filter::parse("(cn>=m)").unwrap();
        assert!(matches!(f, Filter::GreaterOrEqual(ref a) if a.attribute == "cn"));
        assert!(matches!(Filter::parse("(cn<=m)").unwrap(), Filter::LessOrEqual(_)));
        assert!(matches!(Filter::parse("(cn~=m)").unwrap(), Filter::Approx(_)));
        assert_eq!(Filter::parse("(mail=*)").unwrap(), Filter::present("mail"));
        assert_eq!(Filter::parse("(cn=Bob)").unwrap(), Filter::eq("cn", "Bob"));
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |depth: usize| {
            format!("{}(cn=x){}", "(!".repeat(depth), ")".repeat(depth))
        };
        assert!(Filter::parse(&nested(MAX_FILTER_DEPTH - 1)).is_ok());
        let err = Filter::parse(&nested(200_000)).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { ref message } if message.contains("too deeply")));

        let siblings = format!("(&{})", "(cn=x)".repeat(10_000));
        assert!(Filter::parse(&siblings).is_ok());
    }

    #[test]
    fn parses_substrings() {
        let f = Filter::parse("(cn=J*n*son)").unwrap();
        assert_eq!(
            f,
            Filter::Substring(SubstringAssertion {
                attribute: "cn".into(),
                initial: Some("J".into()),
                any: vec!["n".into()],
                final_part: Some("son".into()),
            })
        );
        let f = Filter::parse("(cn=*x*)").unwrap();
        assert!(matches!(f, Filter::Substring(ref s) if s.initial.is_none() && s.any == vec!["x".to_string()] && s.final_part.is_none()));
    }

    #[test]
    fn parses_extensible_match() {
        let f = Filter::parse("(cn:dn:2.5.13.5:=Fred)").unwrap();
        assert_eq!(
            f,
            Filter::Extensible(ExtensibleAssertion {
                attribute: Some("cn".into()),
                matching_rule: Some("2.5.13.5".into()),
                value: Value::from("Fred"),
                dn_attributes: true,
            })
        );
        assert_eq!(f.to_string(), "(cn:dn:2.5.13.5:=Fred)");
        assert!(Filter::parse("(:=x)").is_err());
    }

    #[test]
    fn escapes_round_trip_through_display() {
        let f = Filter::parse(r"(cn=a\2ab\28)").unwrap();
        assert_eq!(f, Filter::eq("cn", "a*b("));
        assert_eq!(f.to_string(), r"(cn=a\2ab\28)");
    }

    #[test]
    fn binary_values_survive() {
        let f = Filter::parse(r"(userPassword=\ff\00)").unwrap();
        assert_eq!(f, Filter::eq("userPassword", vec![0xffu8, 0x00]));
    }

    #[test]
    fn rejects_malformed_filters() {
        for bad in ["", "cn=x", "(cn=x", "(&)", "(=x)", "(cn=x))", r"(cn=\z1)", "(cn=a(b)"] {
            assert!(Filter::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn collects_attribute_names() {
        let f = Filter::parse("(&(cn=a)(|(sn=b)(!(mail=*))))").unwrap();
        assert_eq!(f.attributes(), vec!["cn", "sn", "mail"]);
    }
}
