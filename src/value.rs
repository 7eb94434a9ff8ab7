use std::fmt;

/// An attribute value: either human-readable text or raw bytes.
///
/// Binary values render as backslash-hex escapes (`\41\42`), which is also
/// the form the normalization service decodes when a binary attribute
/// receives text.
///
/// # Examples
///
/// ```
/// use directory_core::Value;
///
/// let text = Value::from("Alice");
/// assert_eq!(text.as_text(), Some("Alice"));
///
/// let bytes = Value::from(vec![0x41u8, 0x42]);
/// assert_eq!(bytes.to_string(), "\\41\\42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl Value {
    /// Returns the text form, or `None` for binary values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of the value (UTF-8 bytes for text).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::Text(s) => s.as_bytes(),
            Value::Binary(b) => b,
        }
    }

    /// Returns true for binary values.
    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Binary(bytes) => {
                for b in bytes {
                    write!(f, "\\{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Binary(b.to_vec())
    }
}
