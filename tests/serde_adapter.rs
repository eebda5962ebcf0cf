use std::collections::BTreeMap;
use std::sync::Arc;

use avro_reflect::{
    Deserializer, Engine, Error, MemoryRegistry, ReflectDeserializer, ReflectSerde, ReflectSerializer, Serializer,
    reflect_record,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

#[derive(Debug, PartialEq)]
struct Payment {
    account: String,
    cents: i64,
    memo: Option<String>,
}
reflect_record!(Payment { account, cents, memo });

fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn payment() -> Payment {
    Payment { account: "acc-1".into(), cents: 1999, memo: None }
}

#[test]
fn configured_from_a_mock_url() {
    let mut serde = ReflectSerde::<Payment>::new().with_engine(Arc::new(Engine::new()));
    serde.configure(&props(&[("schema.registry.url", "mock://serde-adapter-url")]), false).unwrap();

    let bytes = serde.serialize("payments", Some(&payment())).unwrap().unwrap();
    assert_eq!(bytes[0], 0);
    assert_eq!(serde.deserialize("payments", Some(&bytes)).unwrap(), Some(payment()));
    assert_eq!(MemoryRegistry::scoped("serde-adapter-url").subjects(), ["payments-value"]);
}

#[test]
fn keys_and_record_subjects() {
    let registry = MemoryRegistry::scoped("serde-adapter-subjects");
    let mut keys = ReflectSerializer::<Payment>::new();
    Serializer::configure(
        &mut keys,
        &props(&[
            ("schema.registry.url", "mock://serde-adapter-subjects"),
            ("subject.name.strategy", "record"),
        ]),
        true,
    )
    .unwrap();
    keys.serialize("payments", Some(&payment())).unwrap();
    assert_eq!(registry.subjects(), ["serde_adapter.Payment"]);
}

#[test]
fn lookups_without_auto_registration() {
    let url = "mock://serde-adapter-no-auto";
    let mut strict = ReflectSerializer::<Payment>::new();
    Serializer::configure(&mut strict, &props(&[("schema.registry.url", url), ("auto.register.schemas", "false")]), false)
        .unwrap();
    let err = strict.serialize("payments", Some(&payment())).unwrap_err();
    assert!(matches!(err, Error::Registry(_)), "{err}");

    let mut loose = ReflectSerializer::<Payment>::new();
    Serializer::configure(&mut loose, &props(&[("schema.registry.url", url)]), false).unwrap();
    let registered = loose.serialize("payments", Some(&payment())).unwrap();
    assert_eq!(strict.serialize("payments", Some(&payment())).unwrap(), registered);
}

#[test]
fn configure_needs_a_registry() {
    let mut serde = ReflectSerde::<Payment>::new();
    assert!(matches!(serde.configure(&BTreeMap::new(), false), Err(Error::Config(_))));
    let err = serde.configure(&props(&[("schema.registry.url", "https://registry.invalid")]), false).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn json_values_round_trip_through_the_registry() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut serializer = ReflectSerializer::<Value>::new().with_engine(Arc::new(Engine::new())).with_registry(registry.clone());
    Serializer::configure(
        &mut serializer,
        &props(&[("dynamic.record.name", "Reading"), ("dynamic.record.namespace", "telemetry")]),
        false,
    )
    .unwrap();
    let deserializer = ReflectDeserializer::<Value>::new().with_registry(registry);

    let reading = json!({"device": "sensor-7", "celsius": 21.5, "tags": ["north", "rack-12"]});
    let bytes = serializer.serialize("telemetry", Some(&reading)).unwrap().unwrap();
    assert_eq!(deserializer.deserialize("telemetry", Some(&bytes)).unwrap(), Some(reading));
    assert_eq!(serializer.writer_schema().and_then(|s| s.name()).map(|n| n.fullname()).as_deref(), Some("telemetry.Reading"));
}

#[test]
fn json_readers_accept_typed_writers() {
    let registry = Arc::new(MemoryRegistry::new());
    let serializer = ReflectSerializer::<Payment>::new().with_registry(registry.clone());
    let deserializer = ReflectDeserializer::<Value>::new().with_registry(registry);

    let bytes = serializer.serialize("payments", Some(&payment())).unwrap().unwrap();
    assert_eq!(
        deserializer.deserialize("payments", Some(&bytes)).unwrap(),
        Some(json!({"account": "acc-1", "cents": 1999, "memo": null}))
    );
}

fn json_serde() -> ReflectSerde<Value> {
    ReflectSerde::new().with_engine(Arc::new(Engine::new())).with_registry(Arc::new(MemoryRegistry::new()))
}

#[test]
fn json_values_must_keep_the_pinned_shape() {
    let serde = json_serde();
    serde.serialize("events", Some(&json!({"a": 1}))).unwrap();

    let err = serde.serialize("events", Some(&json!({"a": 2, "b": "extra"}))).unwrap_err();
    assert!(matches!(&err, Error::SchemaMismatch { path, .. } if path == "Root.b"), "{err}");
    let err = serde.serialize("events", Some(&json!({}))).unwrap_err();
    assert!(matches!(&err, Error::SchemaMismatch { path, .. } if path == "Root.a"), "{err}");
}

#[test]
fn mixed_numbers_come_back_unchanged() {
    let serde = json_serde();
    let doc = json!({"xs": [1, 2.5, 3], "total": 6.5});
    let bytes = serde.serialize("numbers", Some(&doc)).unwrap();
    let back = serde.deserialize("numbers", bytes.as_deref()).unwrap().unwrap();
    assert_eq!(back, doc);
    assert!(back["xs"][0].is_i64());
    assert!(back["xs"][1].is_f64());
}
