use crate::entry::Modification;
use crate::error::Result;
use crate::filter::{Assertion, ExtensibleAssertion, Filter, SubstringAssertion};
use crate::interceptor::{Interceptor, Next, Outcome};
use crate::normalization::NameComponentNormalizer;
use crate::request::{Operation, OperationRequest, Searching};
use crate::schema::SchemaHandle;
use crate::value::Value;

pub(super) const NAME: &str = "normalization";

/// Rewrites every name in a request into its canonical form before later
/// stages compare anything.
///
/// - target DN, entry DN, new parent and new RDN are normalized
/// - compare attribute ids become OIDs and the value is normalized
/// - filter assertions are normalized; assertions over attribute types the
///   schema does not know become [`Filter::Undefined`]
/// - requested attribute ids become OIDs (unknown ids are kept as given)
/// - attribute ids in added entries and modifications must be known
///
/// Running the stage on its own output changes nothing.
#[derive(Debug, Clone)]
pub struct NormalizationStage {
    schema: SchemaHandle,
}

impl NormalizationStage {
    /// Normalizes against the schema snapshot current at each request.
    pub fn new(schema: SchemaHandle) -> Self {
        Self { schema }
    }

    /// Applies the rewrite without dispatching.
    ///
    /// # Errors
    ///
    /// `Error::UnknownAttributeType` or `Error::Encoding` from any name or
    /// value.
    pub fn normalize(&self, request: OperationRequest) -> Result<OperationRequest> {
        let n = NameComponentNormalizer::new(self.schema.snapshot());
        let (session, dn, operation) = request.into_parts();
        let dn = n.normalize_dn(&dn)?;

        let operation = match operation {
            Operation::Add { mut entry } => {
                for (id, _) in entry.attributes() {
                    n.registry().lookup(id)?;
                }
                entry.set_dn(dn.clone());
                Operation::Add { entry }
            }
            Operation::Modify { modifications } => {
                for Modification { attribute, .. } in &modifications {
                    n.registry().lookup(attribute)?;
                }
                Operation::Modify { modifications }
            }
            Operation::Move { new_parent } => Operation::Move {
                new_parent: n.normalize_dn(&new_parent)?,
            },
            Operation::MoveAndRename {
                new_parent,
                new_rdn,
                delete_old_rdn,
            } => Operation::MoveAndRename {
                new_parent: n.normalize_dn(&new_parent)?,
                new_rdn: n.normalize_rdn(&new_rdn)?,
                delete_old_rdn,
            },
            Operation::Rename {
                new_rdn,
                delete_old_rdn,
            } => Operation::Rename {
                new_rdn: n.normalize_rdn(&new_rdn)?,
                delete_old_rdn,
            },
            Operation::Compare { attribute, value } => Operation::Compare {
                value: n.normalize_value(&attribute, &value)?,
                attribute: n.normalize_attribute_id(&attribute)?,
            },
            Operation::List { searching } => Operation::List {
                searching: normalize_searching(&n, searching),
            },
            Operation::Lookup { attributes } => Operation::Lookup {
                attributes: normalize_attributes(&n, attributes),
            },
            Operation::Search {
                scope,
                filter,
                searching,
            } => Operation::Search {
                scope,
                filter: normalize_filter(&n, filter)?,
                searching: normalize_searching(&n, searching),
            },
            Operation::Delete => Operation::Delete,
        };

        OperationRequest::from_parts(session, dn, operation)
    }
}

impl Interceptor for NormalizationStage {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
        let request = self.normalize(request)?;
        next.proceed(request)
    }
}

fn normalize_searching(n: &NameComponentNormalizer, searching: Searching) -> Searching {
    Searching {
        attributes: normalize_attributes(n, searching.attributes),
        ..searching
    }
}

fn normalize_attributes(n: &NameComponentNormalizer, attributes: Vec<String>) -> Vec<String> {
    attributes
        .into_iter()
        .map(|id| match id.trim() {
            "*" | "+" => id.trim().to_string(),
            trimmed => n
                .normalize_attribute_id(trimmed)
                .unwrap_or_else(|_| trimmed.to_ascii_lowercase()),
        })
        .collect()
}

/// Filter values arrive with escapes already decoded, so they take the raw
/// byte path.
fn normalize_filter(n: &NameComponentNormalizer, filter: Filter) -> Result<Filter> {
    let assertion = |a: Assertion, make: fn(Assertion) -> Filter| -> Result<Filter> {
        if !n.is_defined(&a.attribute) {
            return Ok(Filter::Undefined(a.attribute));
        }
        Ok(make(Assertion {
            value: n.normalize_bytes_by_name(&a.attribute, a.value.as_bytes())?,
            attribute: n.normalize_attribute_id(&a.attribute)?,
        }))
    };

    Ok(match filter {
        Filter::And(filters) => Filter::And(
            filters
                .into_iter()
                .map(|f| normalize_filter(n, f))
                .collect::<Result<_>>()?,
        ),
        Filter::Or(filters) => Filter::Or(
            filters
                .into_iter()
                .map(|f| normalize_filter(n, f))
                .collect::<Result<_>>()?,
        ),
        Filter::Not(inner) => Filter::Not(Box::new(normalize_filter(n, *inner)?)),
        Filter::Equality(a) => assertion(a, Filter::Equality)?,
        Filter::GreaterOrEqual(a) => assertion(a, Filter::GreaterOrEqual)?,
        Filter::LessOrEqual(a) => assertion(a, Filter::LessOrEqual)?,
        Filter::Approx(a) => assertion(a, Filter::Approx)?,
        Filter::Present(attribute) => match n.normalize_attribute_id(&attribute) {
            Ok(oid) => Filter::Present(oid),
            Err(_) => Filter::Undefined(attribute),
        },
        Filter::Substring(s) => {
            if !n.is_defined(&s.attribute) {
                return Ok(Filter::Undefined(s.attribute));
            }
            let fragment = |text: String| -> Result<String> {
                Ok(match n.normalize_bytes_by_name(&s.attribute, text.as_bytes())? {
                    Value::Text(normalized) => normalized,
                    Value::Binary(_) => text,
                })
            };
            Filter::Substring(SubstringAssertion {
                initial: s.initial.clone().map(fragment).transpose()?,
                any: s.any.iter().cloned().map(fragment).collect::<Result<_>>()?,
                final_part: s.final_part.clone().map(fragment).transpose()?,
                attribute: n.normalize_attribute_id(&s.attribute)?,
            })
        }
        Filter::Extensible(e) => match &e.attribute {
            Some(attribute) if !n.is_defined(attribute) => Filter::Undefined(attribute.clone()),
            Some(attribute) => Filter::Extensible(ExtensibleAssertion {
                value: n.normalize_bytes_by_name(attribute, e.value.as_bytes())?,
                attribute: Some(n.normalize_attribute_id(attribute)?),
                ..e
            }),
            None => Filter::Extensible(e),
        },
        Filter::Undefined(attribute) => Filter::Undefined(attribute),
    })
}
