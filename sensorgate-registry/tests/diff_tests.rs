use pretty_assertions::assert_eq;
use proptest::prelude::*;
use sensorgate_model::{
    ADMIN_SERVICE, FRIENDLY_NAME, MetadataUpdate, ModelDef, ModelOrigin, Provider, ProviderUpdate,
    ResourceDef, ResourceUpdate, ServiceDef, ServiceUpdate,
};
use sensorgate_registry::diff::{self, Merge};
use sensorgate_types::{ChangeEvent, MetadataMap, Timestamp, ValueType};
use serde_json::{Value, json};

fn ts(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

fn make_model() -> ModelDef {
    let mut unit = MetadataMap::new();
    unit.insert("unit".into(), json!("°C"));

    let mut model = ModelDef::new("Thermo", ModelOrigin::Dynamic, ts(0));
    model.services.insert(
        "env".into(),
        ServiceDef::new("env", ts(0)).with_resource(
            ResourceDef::new("temp", ValueType::Float, ts(0)).with_default_extras(unit),
        ),
    );
    model.services.insert(
        "power".into(),
        ServiceDef::new("power", ts(0))
            .with_resource(ResourceDef::new("level", ValueType::Integer, ts(0))),
    );
    model
}

fn make_tree() -> ProviderUpdate {
    ProviderUpdate::new("Thermo", "t1")
        .with_admin(ServiceUpdate::new().with_value(FRIENDLY_NAME, "Kitchen"))
        .with_service("env", ServiceUpdate::new().with_value("temp", 21.5))
}

fn kinds(events: &[ChangeEvent]) -> Vec<&'static str> {
    events.iter().map(ChangeEvent::kind).collect()
}

fn merge_new(tree: &ProviderUpdate) -> Merge {
    diff::merge_provider(&make_model(), None, tree, ts(100))
}

fn meta(entries: &[(&str, Value)]) -> MetadataMap {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

// ── New providers ────────────────────────────────────────────────

#[test]
fn new_provider_announces_admin_then_declared_services() {
    let merge = merge_new(&make_tree());

    assert_eq!(
        kinds(&merge.events),
        vec![
            "addProvider",
            "addService",
            "addResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
            "addService",
            "addResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
        ]
    );
    assert_eq!(merge.events[1].service(), Some(ADMIN_SERVICE));
    assert_eq!(merge.events[5].service(), Some("env"));
    assert_eq!(merge.provider.admin.friendly_name(), Some("Kitchen"));
    assert!(!merge.provider.services.contains_key("power"));
}

#[test]
fn new_resource_events_carry_declared_type_and_effective_metadata() {
    let merge = merge_new(&make_tree());

    match &merge.events[7] {
        ChangeEvent::ResourceValueUpdated {
            value_type,
            old,
            new,
            timestamp,
            ..
        } => {
            assert_eq!(*value_type, ValueType::Float);
            assert_eq!(*old, None);
            assert_eq!(*new, Some(json!(21.5)));
            assert_eq!(*timestamp, ts(100));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &merge.events[8] {
        ChangeEvent::MetadataValueUpdated { old, new, .. } => {
            assert_eq!(*old, None);
            assert_eq!(
                new.clone(),
                Some(meta(&[
                    ("timestamp", json!(100)),
                    ("unit", json!("°C")),
                    ("value", json!(21.5)),
                ]))
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn null_values_do_not_populate_a_service() {
    let tree = ProviderUpdate::new("Thermo", "t1")
        .with_service("power", ServiceUpdate::new().with_value("level", Value::Null));
    let merge = merge_new(&tree);

    assert_eq!(kinds(&merge.events), vec!["addProvider"]);
    assert!(merge.provider.services.is_empty());
}

#[test]
fn dynamic_services_follow_declared_ones() {
    let tree =
        make_tree().with_dynamic_service("radio", ServiceUpdate::new().with_value("rssi", -70));
    let merge = merge_new(&tree);

    let services: Vec<_> = merge
        .events
        .iter()
        .filter(|e| e.kind() == "addService")
        .filter_map(ChangeEvent::service)
        .collect();
    assert_eq!(services, vec![ADMIN_SERVICE, "env", "radio"]);

    // undeclared resources report the inferred type
    match merge.events.last() {
        Some(ChangeEvent::MetadataValueUpdated { resource, .. }) => assert_eq!(resource, "rssi"),
        other => panic!("unexpected event: {other:?}"),
    }
    let rvu = &merge.events[merge.events.len() - 2];
    match rvu {
        ChangeEvent::ResourceValueUpdated { value_type, .. } => {
            assert_eq!(*value_type, ValueType::Integer);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// ── Existing providers ───────────────────────────────────────────

#[test]
fn omitted_service_is_removed_resource_first() {
    let first = merge_new(&make_tree());
    let tree = ProviderUpdate::new("Thermo", "t1");
    let merge = diff::merge_provider(&make_model(), Some(&first.provider), &tree, ts(200));

    assert_eq!(
        kinds(&merge.events),
        vec![
            "removeResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
            "removeService",
        ]
    );
    match &merge.events[1] {
        ChangeEvent::ResourceValueUpdated {
            old, new, timestamp, ..
        } => {
            assert_eq!(*old, Some(json!(21.5)));
            assert_eq!(*new, None);
            assert_eq!(*timestamp, ts(200));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    // an omitted admin section keeps the stored record
    assert_eq!(merge.provider.admin.friendly_name(), Some("Kitchen"));
    assert!(merge.provider.services.is_empty());
}

#[test]
fn changed_value_keeps_stored_extras_without_explicit_metadata() {
    let mut first = merge_new(&make_tree());
    first.provider.services["env"].resources["temp"]
        .metadata
        .extra
        .insert("source".into(), json!("zigbee"));

    let tree = ProviderUpdate::new("Thermo", "t1")
        .with_service("env", ServiceUpdate::new().with_value("temp", 22.0));
    let merge = diff::merge_provider(&make_model(), Some(&first.provider), &tree, ts(300));

    assert_eq!(
        kinds(&merge.events),
        vec!["resourceValueUpdate", "metadataValueUpdate"]
    );
    let stored = &merge.provider.services["env"].resources["temp"];
    assert_eq!(stored.value, json!(22.0));
    assert_eq!(stored.metadata.timestamp, ts(300));
    assert_eq!(stored.metadata.extra.get("source"), Some(&json!("zigbee")));
}

#[test]
fn explicit_metadata_replaces_extras_and_timestamp() {
    let first = merge_new(&make_tree());
    let explicit = MetadataUpdate::at(ts(42)).with_extra("quality", "good");
    let tree = ProviderUpdate::new("Thermo", "t1").with_service(
        "env",
        ServiceUpdate::new().with("temp", ResourceUpdate::value(19.0).with_metadata(explicit)),
    );
    let merge = diff::merge_provider(&make_model(), Some(&first.provider), &tree, ts(300));

    let stored = &merge.provider.services["env"].resources["temp"];
    assert_eq!(stored.metadata.timestamp, ts(42));
    assert_eq!(stored.metadata.extra, meta(&[("quality", json!("good"))]));
    match &merge.events[1] {
        ChangeEvent::MetadataValueUpdated { new, timestamp, .. } => {
            assert_eq!(*timestamp, ts(42));
            assert_eq!(
                new.clone(),
                Some(meta(&[
                    ("quality", json!("good")),
                    ("timestamp", json!(42)),
                    ("unit", json!("°C")),
                    ("value", json!(19.0)),
                ]))
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn equal_value_ignores_incoming_metadata() {
    let first = merge_new(&make_tree());
    let tree = ProviderUpdate::new("Thermo", "t1").with_service(
        "env",
        ServiceUpdate::new().with(
            "temp",
            ResourceUpdate::value(21.5).with_metadata(MetadataUpdate::at(ts(999))),
        ),
    );
    let merge = diff::merge_provider(&make_model(), Some(&first.provider), &tree, ts(300));

    assert!(merge.events.is_empty());
    assert_eq!(
        merge.provider.services["env"].resources["temp"].metadata.timestamp,
        ts(100)
    );
}

#[test]
fn links_survive_a_merge() {
    let mut first = merge_new(&make_tree());
    first.provider.admin.linked_providers.push("child".into());
    let merge = diff::merge_provider(&make_model(), Some(&first.provider), &make_tree(), ts(5));

    assert!(merge.events.is_empty());
    assert_eq!(merge.provider.admin.linked_providers, vec!["child"]);
}

// ── Low-level writes ─────────────────────────────────────────────

#[test]
fn write_value_sets_updates_and_unsets() {
    let model = make_model();
    let mut provider = Provider::new("t1", "Thermo", None);

    let write = diff::write_value(
        &model,
        &mut provider,
        "power",
        "level",
        Some(json!(3)),
        ts(10),
        true,
    );
    assert_eq!(
        kinds(&write.events),
        vec![
            "addService",
            "addResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
        ]
    );

    let write = diff::write_value(
        &model,
        &mut provider,
        "power",
        "level",
        Some(json!(3)),
        ts(20),
        true,
    );
    assert_eq!(kinds(&write.events), vec!["metadataValueUpdate"]);

    let write = diff::write_value(
        &model,
        &mut provider,
        "power",
        "level",
        Some(json!(3)),
        ts(20),
        true,
    );
    assert!(write.events.is_empty());
    assert!(!write.stale);

    let write = diff::write_value(&model, &mut provider, "power", "level", None, ts(30), true);
    assert_eq!(
        kinds(&write.events),
        vec![
            "removeResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
            "removeService",
        ]
    );
    assert!(!provider.services.contains_key("power"));
}

#[test]
fn write_value_drops_older_timestamps() {
    let model = make_model();
    let mut provider = Provider::new("t1", "Thermo", None);
    diff::write_value(&model, &mut provider, "env", "temp", Some(json!(20.0)), ts(50), true);

    let write = diff::write_value(
        &model,
        &mut provider,
        "env",
        "temp",
        Some(json!(1.0)),
        ts(40),
        true,
    );
    assert!(write.stale);
    assert!(write.events.is_empty());
    assert_eq!(provider.value("env", "temp"), Some(&json!(20.0)));

    let write = diff::write_value(
        &model,
        &mut provider,
        "env",
        "temp",
        Some(json!(1.0)),
        ts(40),
        false,
    );
    assert!(!write.stale);
    assert_eq!(provider.value("env", "temp"), Some(&json!(1.0)));
}

#[test]
fn unsetting_an_unset_resource_leaves_no_empty_service() {
    let model = make_model();
    let mut provider = Provider::new("t1", "Thermo", None);
    let write = diff::write_value(&model, &mut provider, "power", "level", None, ts(1), true);

    assert!(write.events.is_empty());
    assert!(provider.services.is_empty());
}

#[test]
fn removal_events_cover_every_populated_service() {
    let merge = merge_new(&make_tree());
    let events = diff::removal_events(&make_model(), &merge.provider, ts(500));

    assert_eq!(
        kinds(&events),
        vec![
            "removeResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
            "removeService",
            "removeResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
            "removeService",
            "removeProvider",
        ]
    );
    assert_eq!(events[3].service(), Some(ADMIN_SERVICE));
    assert_eq!(events[7].service(), Some("env"));
}

// ── Properties ───────────────────────────────────────────────────

fn arb_service() -> impl Strategy<Value = ServiceUpdate> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["a", "b", "c"]),
            prop_oneof![Just(Value::Null), (0i64..5).prop_map(Value::from)],
        ),
        0..4,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .fold(ServiceUpdate::new(), |svc, (name, value)| svc.with_value(name, value))
    })
}

fn arb_tree() -> impl Strategy<Value = ProviderUpdate> {
    (
        prop::option::of(arb_service()),
        prop::collection::vec((prop::sample::select(vec!["s1", "s2", "s3"]), arb_service()), 0..3),
        prop::collection::vec((prop::sample::select(vec!["d1", "d2"]), arb_service()), 0..2),
    )
        .prop_map(|(admin, services, dynamic)| {
            let mut tree = ProviderUpdate::new("Open", "p");
            tree.admin = admin;
            for (name, svc) in services {
                tree = tree.with_service(name, svc);
            }
            for (name, svc) in dynamic {
                tree = tree.with_dynamic_service(name, svc);
            }
            tree
        })
}

fn open_model() -> ModelDef {
    let mut model = ModelDef::new("Open", ModelOrigin::Dynamic, ts(0));
    for name in ["s1", "s2", "s3"] {
        let mut svc = ServiceDef::new(name, ts(0));
        for res in ["a", "b", "c"] {
            svc.add_resource(ResourceDef::new(res, ValueType::Integer, ts(0)));
        }
        model.services.insert(name.into(), svc);
    }
    if let Some(admin) = model.services.get_mut(ADMIN_SERVICE) {
        for res in ["a", "b", "c"] {
            admin.add_resource(ResourceDef::new(res, ValueType::Integer, ts(0)));
        }
    }
    model
}

proptest! {
    #[test]
    fn merging_twice_emits_nothing(tree in arb_tree()) {
        let model = open_model();
        let first = diff::merge_provider(&model, None, &tree, ts(1));
        let again = diff::merge_provider(&model, Some(&first.provider), &tree, ts(2));
        prop_assert!(again.events.is_empty(), "events: {:?}", again.events);
        prop_assert_eq!(again.provider, first.provider);
    }

    #[test]
    fn merging_the_stored_tree_emits_nothing(tree in arb_tree()) {
        let model = open_model();
        let first = diff::merge_provider(&model, None, &tree, ts(1));
        let stored = ProviderUpdate::from(&first.provider);
        let again = diff::merge_provider(&model, Some(&first.provider), &stored, ts(2));
        prop_assert!(again.events.is_empty());
        prop_assert_eq!(again.provider, first.provider);
    }

    #[test]
    fn every_value_event_follows_its_add(tree in arb_tree()) {
        let merge = diff::merge_provider(&open_model(), None, &tree, ts(1));
        let mut added = std::collections::HashSet::new();
        for event in &merge.events {
            match event.kind() {
                "addResource" => {
                    added.insert((
                        event.service().map(str::to_string),
                        event.resource().map(str::to_string),
                    ));
                }
                "resourceValueUpdate" | "metadataValueUpdate" => {
                    let key = (
                        event.service().map(str::to_string),
                        event.resource().map(str::to_string),
                    );
                    prop_assert!(added.contains(&key));
                }
                _ => {}
            }
        }
    }
}
