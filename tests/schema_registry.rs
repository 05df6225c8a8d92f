#[path = "common/mod.rs"]
mod common;

use causeway::error::Error;
use causeway::schema::{SchemaRegistry, LATEST_VERSION};

const PERSON_V2: &str = r#"
{
    "type": "record",
    "name": "Person",
    "fields": [
        {"name": "firstName", "type": "string"},
        {"name": "lastName", "type": "string"},
        {"name": "age", "type": ["null", "int"], "default": null}
    ]
}
"#;

async fn registry_with_person() -> SchemaRegistry {
    let url = common::mock_registry(&[(
        "person",
        &[(1, 7, common::PERSON_SCHEMA), (2, 11, PERSON_V2)],
    )])
    .await;
    SchemaRegistry::new(&url).expect("registry client")
}

#[tokio::test]
async fn resolves_an_explicit_version() {
    let registry = registry_with_person().await;

    let resolved = registry.resolve("person", 1).await.expect("version 1 resolves");

    assert_eq!(resolved.subject, "person");
    assert_eq!(resolved.version, 1);
    assert_eq!(resolved.id, 7);
}

#[tokio::test]
async fn version_zero_selects_the_latest_version() {
    let registry = registry_with_person().await;

    let resolved = registry
        .resolve("person", LATEST_VERSION)
        .await
        .expect("latest resolves");

    assert_eq!(resolved.version, 2);
    assert_eq!(resolved.id, 11);
}

#[tokio::test]
async fn latest_version_is_the_maximum_registered() {
    let registry = registry_with_person().await;
    assert_eq!(registry.latest_version("person").await.expect("versions"), 2);
}

#[tokio::test]
async fn exists_distinguishes_registered_subjects() {
    let registry = registry_with_person().await;

    assert!(registry.exists("person").await.expect("subject list"));
    assert!(!registry.exists("order").await.expect("subject list"));
}

#[tokio::test]
async fn unknown_subject_is_a_lookup_error() {
    let registry = registry_with_person().await;

    let err = registry
        .resolve("order", 1)
        .await
        .expect_err("unknown subject must fail");

    match err {
        Error::SchemaLookup { subject, .. } => assert_eq!(subject, "order"),
        other => panic!("expected SchemaLookup, got: {other}"),
    }
}

#[tokio::test]
async fn unreachable_registry_is_a_lookup_error() {
    let registry = SchemaRegistry::new("http://127.0.0.1:1").expect("registry client");

    let err = registry
        .resolve("person", 1)
        .await
        .expect_err("unreachable registry must fail");

    assert!(matches!(err, Error::SchemaLookup { .. }), "got: {err}");
}

#[tokio::test]
async fn resolved_schemas_are_cached_per_subject_and_version() {
    let registry = registry_with_person().await;

    let first = registry.resolve("person", 1).await.expect("first fetch");
    let second = registry.resolve("person", 1).await.expect("cached fetch");

    // Same allocation: the second call never re-fetched.
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}
