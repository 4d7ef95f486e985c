use super::*;

#[test]
fn generate_produces_distinct_uuids() {
    let a = SourceId::generate();
    let b = SourceId::generate();
    assert_ne!(a, b);
    assert!(Uuid::parse_str(a.as_str()).is_ok());
}

#[test]
fn process_identity_is_stable() {
    assert_eq!(SourceId::process(), SourceId::process());
    assert!(!SourceId::process().is_empty());
}

#[test]
fn source_id_is_a_plain_json_string() {
    let id = SourceId::from("abc");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    assert_eq!(id.to_string(), "abc");
}

#[test]
fn admit_drops_own_identity() {
    let local = SourceId::from("me");
    let mut echo = EchoSuppressor::new(local.clone());
    assert_eq!(echo.admit(&local), Verdict::Echo);
    assert_eq!(echo.admit(&SourceId::from("peer")), Verdict::Accept);
    assert_eq!(echo.admit(&SourceId::from("me")), Verdict::Echo);
    assert_eq!(echo.dropped(), 2);
}

#[test]
fn admit_accepts_legacy_envelopes_without_identity() {
    let mut echo = EchoSuppressor::new(SourceId::generate());
    assert_eq!(echo.admit(&SourceId::default()), Verdict::Accept);
    assert_eq!(echo.dropped(), 0);
}
