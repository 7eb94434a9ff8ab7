mod common;

use std::time::Duration;

use common::{admin, dn, init_tracing, populate, service, service_with, user, Recorder, Refuse};
use directory_core::{
    BackendErrorKind, DirectoryConfig, DirectoryService, Entry, Error, Filter, InterceptorChain,
    Limit, MemoryBackend, Modification, NormalizationStage, OperationRequest, Principal,
    ReferralHandlingMode, Rdn, Scope, StageKind, Value,
};

#[test]
fn session_drives_every_operation() {
    init_tracing();
    let (service, _) = service();
    let session = service.session(admin());
    populate(&session, 2);

    let alice = dn("uid=user0,ou=people,o=acme");
    assert!(session.compare(&alice, "cn", "  user 0 ").unwrap());
    assert!(!session.compare(&alice, "cn", "User 1").unwrap());

    session
        .modify(&alice, vec![Modification::add("mail", vec!["user0@acme.test".into()])])
        .unwrap();
    let entry = session.lookup(&alice, &["mail", "modifiersName"]).unwrap();
    assert_eq!(entry.get("mail").unwrap(), &[Value::from("user0@acme.test")]);
    assert_eq!(
        entry.get("modifiersName").unwrap(),
        &[Value::from("uid=admin,ou=system")]
    );
    assert!(!entry.contains("cn"));

    session
        .rename(&alice, Rdn::parse("uid=alice").unwrap(), true)
        .unwrap();
    let renamed = dn("uid=alice,ou=people,o=acme");
    assert_eq!(
        session.lookup(&renamed, &["uid"]).unwrap().get("uid").unwrap(),
        &[Value::from("alice")]
    );

    session
        .add(Entry::new(dn("ou=staff,o=acme")).with("ou", "staff"))
        .unwrap();
    session.move_entry(&renamed, &dn("ou=staff,o=acme")).unwrap();
    session
        .move_and_rename(
            &dn("uid=alice,ou=staff,o=acme"),
            &dn("ou=people,o=acme"),
            Rdn::parse("uid=alicia").unwrap(),
            false,
        )
        .unwrap();

    let children: Vec<Entry> = session
        .list(&dn("ou=people,o=acme"))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(children.len(), 2);

    let alicia = dn("uid=alicia,ou=people,o=acme");
    let uids = session.lookup(&alicia, &["uid"]).unwrap();
    assert_eq!(uids.get("uid").unwrap().len(), 2);

    session.delete(&alicia).unwrap();
    let err = session.lookup(&alicia, &[]).unwrap_err();
    assert!(matches!(err, Error::Backend(ref e) if e.kind() == BackendErrorKind::NoSuchObject));
}

#[test]
fn stages_run_in_order_and_see_normalized_names() {
    let first = Recorder::new("first");
    let second = Recorder::new("second");
    let chain = InterceptorChain::builder()
        .with(first.clone())
        .with(NormalizationStage::new(common::schema()))
        .with(second.clone())
        .build();
    let (service, _) = service_with(chain);
    let session = service.session(admin());

    let _ = session.lookup(&dn("CN=Bob, O=Acme"), &[]);
    assert_eq!(first.seen(), vec!["lookup 'CN=Bob,O=Acme'"]);
    assert_eq!(second.seen(), vec!["lookup '2.5.4.3=bob,2.5.4.10=acme'"]);
}

#[test]
fn abort_skips_later_stages_and_the_backend() {
    let before = Recorder::new("before");
    let refuse = Refuse::default();
    let after = Recorder::new("after");
    let chain = InterceptorChain::builder()
        .with(before.clone())
        .with(refuse.clone())
        .with(after.clone())
        .build();
    let (service, backend) = service_with(chain);
    let session = service.session(admin());

    let err = session
        .add(Entry::new(dn("o=acme")).with("o", "acme"))
        .unwrap_err();
    match err {
        Error::StageAbort { stage, reason } => {
            assert_eq!(stage, "refuse");
            assert_eq!(reason, "not today");
        }
        other => panic!("expected an abort, got {:?}", other),
    }
    assert_eq!(before.seen().len(), 1);
    assert_eq!(refuse.hits(), 1);
    assert!(after.seen().is_empty());
    assert!(backend.is_empty());
}

#[test]
fn size_limit_stops_after_the_limit() {
    let (service, _) = service();
    let session = service.session(admin());
    populate(&session, 10);

    let mut cursor = session
        .search_with_limits(
            &dn("ou=people,o=acme"),
            Scope::OneLevel,
            Filter::eq("objectClass", "person"),
            &[],
            5,
            Duration::ZERO,
        )
        .unwrap();
    for _ in 0..5 {
        assert!(cursor.next().unwrap().is_ok());
    }
    assert!(matches!(
        cursor.next(),
        Some(Err(Error::LimitExceeded(Limit::Size(5))))
    ));
    assert!(cursor.next().is_none());
    assert!(cursor.is_closed());
}

#[test]
fn exact_size_limit_is_not_an_error() {
    let (service, _) = service();
    let session = service.session(admin());
    populate(&session, 5);

    let found: Vec<Entry> = session
        .search_with_limits(
            &dn("ou=people,o=acme"),
            Scope::OneLevel,
            Filter::present("uid"),
            &["uid"],
            5,
            Duration::ZERO,
        )
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(found.len(), 5);
    assert!(found.iter().all(|e| !e.contains("cn")));
}

#[test]
fn unknown_attribute_types() {
    let (service, _) = service();
    let session = service.session(admin());
    populate(&session, 3);

    let err = session.lookup(&dn("shoeSize=9,o=acme"), &[]).unwrap_err();
    assert!(matches!(err, Error::UnknownAttributeType { ref id } if id == "shoeSize"));

    // An unknown type in a filter matches nothing instead of failing.
    let filter = Filter::parse("(|(shoeSize=9)(uid=user1))").unwrap();
    let found = session
        .search(&dn("o=acme"), Scope::Subtree, filter)
        .unwrap()
        .count();
    assert_eq!(found, 1);

    // Negating an undefined assertion still selects nothing.
    let negated = session
        .search(&dn("o=acme"), Scope::Subtree, Filter::parse("(!(shoeSize=42))").unwrap())
        .unwrap()
        .count();
    assert_eq!(negated, 0);

    let err = session
        .add(Entry::new(dn("cn=x,o=acme")).with("shoeSize", "9"))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownAttributeType { .. }));
}

#[test]
fn anonymous_sessions_and_proxied_authorization() {
    let (service, _) = service();
    populate(&service.session(admin()), 1);

    let mut session = service.session(Principal::anonymous());
    assert!(session.effective_principal().is_anonymous());
    assert_eq!(
        session.lookup(&dn("o=acme"), &["o"]).unwrap().get("o").unwrap(),
        &[Value::from("acme")]
    );
    let err = session.delete(&dn("uid=user0,ou=people,o=acme")).unwrap_err();
    assert!(matches!(err, Error::StageAbort { ref stage, .. } if stage == "authentication"));

    session.authorize_as(admin());
    assert_eq!(session.effective_principal(), &admin());
    assert!(session.authenticated_principal().is_anonymous());
    session.delete(&dn("uid=user0,ou=people,o=acme")).unwrap();

    session.clear_authorization();
    assert!(session.delete(&dn("ou=people,o=acme")).is_err());
}

#[test]
fn root_dse_lists_naming_contexts() {
    let (service, _) = service();
    populate(&service.session(admin()), 0);
    let root = service
        .session(Principal::anonymous())
        .lookup(&directory_core::Dn::root(), &[])
        .unwrap();
    assert_eq!(root.get("namingContexts").unwrap(), &[Value::from("o=acme")]);
}

fn configured(json: &str) -> DirectoryService {
    let config = DirectoryConfig::from_json(json).unwrap();
    let schema = common::schema();
    let backend = std::sync::Arc::new(MemoryBackend::new(schema.clone()));
    DirectoryService::from_config(&config, schema, backend).unwrap()
}

#[test]
fn referral_mode_is_per_session() {
    let service = configured(
        r#"{
            "referrals": [ { "dn": "ou=remote,o=acme", "urls": ["ldap://remote.example/"] } ]
        }"#,
    );
    let mut session = service.session(admin());
    populate(&session, 0);
    session
        .add(
            Entry::new(dn("ou=remote,o=acme"))
                .with("objectClass", "referral")
                .with("ou", "remote"),
        )
        .unwrap();

    assert!(session.lookup(&dn("ou=remote,o=acme"), &[]).is_ok());

    session.set_referral_handling_mode(ReferralHandlingMode::Follow);
    match session.lookup(&dn("OU=Remote,O=Acme"), &[]) {
        Err(Error::StageAbort { stage, reason }) => {
            assert_eq!(stage, "referral");
            assert!(reason.contains("ldap://remote.example/"));
        }
        other => panic!("expected a referral, got {:?}", other),
    }

    let names: Vec<String> = session
        .search(&dn("o=acme"), Scope::Subtree, Filter::present("objectClass"))
        .unwrap()
        .map(|e| e.unwrap().dn().user_form().to_string())
        .collect();
    assert_eq!(names, vec!["o=acme", "ou=people,o=acme"]);
}

#[test]
fn access_control_from_configuration() {
    let service = configured(
        r#"{
            "access_control": {
                "protected": ["ou=people,o=acme"],
                "administrators": ["uid=admin,ou=system"]
            }
        }"#,
    );
    let admin_session = service.session(admin());
    populate(&admin_session, 3);

    let session = service.session(user("uid=guest,o=acme"));
    let visible = session
        .search(&dn("o=acme"), Scope::Subtree, Filter::present("objectClass"))
        .unwrap()
        .count();
    assert_eq!(visible, 1);
    assert_eq!(session.list(&dn("ou=people,o=acme")).unwrap().count(), 0);
    assert!(matches!(
        session.lookup(&dn("uid=user1,ou=people,o=acme"), &[]),
        Err(Error::StageAbort { ref stage, .. }) if stage == "access-control"
    ));

    let all = admin_session
        .search(&dn("o=acme"), Scope::Subtree, Filter::present("objectClass"))
        .unwrap()
        .count();
    assert_eq!(all, 5);
}

#[test]
fn configured_defaults_reach_requests() {
    let service = configured(r#"{ "size_limit": 2, "alias_deref": "always" }"#);
    let session = service.session(admin());
    populate(&session, 4);

    let request = OperationRequest::list(session.context())
        .base(dn("ou=people,o=acme"))
        .build()
        .unwrap();
    let results: Vec<_> = session
        .dispatch(request)
        .unwrap()
        .into_entries("list")
        .unwrap()
        .collect();
    assert_eq!(results.len(), 3);
    assert!(matches!(
        results.last(),
        Some(Err(Error::LimitExceeded(Limit::Size(2))))
    ));
}

#[test]
fn configured_chain_order_is_respected() {
    let service = configured(r#"{ "interceptors": ["authentication", "normalization"] }"#);
    assert_eq!(service.chain().names(), vec!["authentication", "normalization"]);
    assert_eq!(
        DirectoryConfig::default().interceptors,
        StageKind::standard().to_vec()
    );
}

#[test]
fn configuration_loads_from_a_file() {
    let path = std::env::temp_dir().join(format!("directory-core-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "service_id": "from-file", "time_limit_secs": 30 }"#).unwrap();
    let config = DirectoryConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.service_id, "from-file");
    assert_eq!(
        config.request_defaults().limits.time,
        Some(Duration::from_secs(30))
    );
}
