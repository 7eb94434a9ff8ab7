use time::OffsetDateTime;

use crate::entry::Modification;
use crate::error::Result;
use crate::interceptor::{Interceptor, Next, Outcome};
use crate::request::{Operation, OperationRequest};
use crate::value::Value;

pub(super) const NAME: &str = "operational-attributes";

const CREATE_TIMESTAMP: &str = "createTimestamp";
const CREATORS_NAME: &str = "creatorsName";
const MODIFY_TIMESTAMP: &str = "modifyTimestamp";
const MODIFIERS_NAME: &str = "modifiersName";

/// Stamps `createTimestamp`/`creatorsName` on added entries and
/// `modifyTimestamp`/`modifiersName` on modifications, overwriting whatever
/// the client supplied for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationalAttributeStage;

impl Interceptor for OperationalAttributeStage {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&self, request: OperationRequest, next: Next<'_>) -> Result<Outcome> {
        if !matches!(
            request.operation(),
            Operation::Add { .. } | Operation::Modify { .. }
        ) {
            return next.proceed(request);
        }

        let now = Value::from(generalized_time(OffsetDateTime::now_utc()));
        let who = Value::from(
            request
                .session()
                .effective_principal()
                .name()
                .user_form()
                .to_string(),
        );
        let (session, dn, operation) = request.into_parts();
        let operation = match operation {
            Operation::Add { mut entry } => {
                entry.set(CREATE_TIMESTAMP, vec![now]);
                entry.set(CREATORS_NAME, vec![who]);
                Operation::Add { entry }
            }
            Operation::Modify { mut modifications } => {
                modifications.retain(|m| {
                    !m.attribute.eq_ignore_ascii_case(MODIFY_TIMESTAMP)
                        && !m.attribute.eq_ignore_ascii_case(MODIFIERS_NAME)
                });
                modifications.push(Modification::replace(MODIFY_TIMESTAMP, vec![now]));
                modifications.push(Modification::replace(MODIFIERS_NAME, vec![who]));
                Operation::Modify { modifications }
            }
            other => other,
        };
        next.proceed(OperationRequest::from_parts(session, dn, operation)?)
    }
}

/// `YYYYMMDDHHMMSSZ`
fn generalized_time(t: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::dn::Dn;
    use crate::entry::Entry;
    use crate::interceptor::InterceptorChain;
    use crate::principal::{AuthenticationLevel, Principal};
    use crate::schema::{SchemaHandle, SchemaRegistry};
    use crate::session::SessionContext;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn ctx() -> SessionContext {
        SessionContext::new(
            1,
            "test",
            Principal::new(dn("uid=admin,ou=system"), AuthenticationLevel::Simple),
        )
    }

    #[test]
    fn formats_generalized_time() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(generalized_time(t), "20231114221320Z");
    }

    #[test]
    fn add_and_modify_are_stamped() {
        let backend = MemoryBackend::new(SchemaHandle::new(SchemaRegistry::core()));
        let chain = InterceptorChain::builder()
            .with(OperationalAttributeStage)
            .build();

        let entry = Entry::new(dn("o=acme"))
            .with("o", "acme")
            .with("creatorsName", "cn=forged");
        chain
            .dispatch(OperationRequest::add(ctx(), entry).unwrap(), &backend)
            .unwrap();
        let stored = backend.lookup(&dn("o=acme"), &[]).unwrap();
        assert_eq!(
            stored.get("creatorsName").unwrap(),
            &[Value::from("uid=admin,ou=system")]
        );
        assert_eq!(stored.get("createTimestamp").unwrap()[0].as_bytes().len(), 15);

        let modify = OperationRequest::modify(
            ctx(),
            dn("o=acme"),
            vec![
                Modification::replace("description", vec!["head office".into()]),
                Modification::replace("modifiersName", vec!["cn=forged".into()]),
            ],
        )
        .unwrap();
        chain.dispatch(modify, &backend).unwrap();
        let stored = backend.lookup(&dn("o=acme"), &[]).unwrap();
        assert_eq!(
            stored.get("modifiersName").unwrap(),
            &[Value::from("uid=admin,ou=system")]
        );
        assert!(stored.contains("modifyTimestamp"));
        assert!(stored.contains("description"));
    }
}
