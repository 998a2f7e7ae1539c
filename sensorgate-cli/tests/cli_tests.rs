use clap::Parser;
use pretty_assertions::assert_eq;
use sensorgate_cli::{Args, UpdateLine, load_config, run};
use sensorgate_model::Provider;
use sensorgate_types::{ChangeEvent, Timestamp};
use serde_json::json;
use std::path::{Path, PathBuf};

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("gateway.db")
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, command: &[&str]) -> String {
        let db = self.db();
        let mut argv = vec!["sensorgate", "--db", db.to_str().unwrap()];
        argv.extend_from_slice(command);
        let args = Args::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        run(&args, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn events(&self, command: &[&str]) -> Vec<ChangeEvent> {
        self.run(command)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn dump(&self) -> Vec<Provider> {
        serde_json::from_str(&self.run(&["dump"])).unwrap()
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn config_defaults_without_file() {
    let config = load_config(None).unwrap();
    assert_eq!(config.self_provider_id, "gateway");
    assert!(config.drop_stale_updates);
}

#[test]
fn config_reads_partial_toml() {
    let ws = Workspace::new();
    let path = ws.write("registry.toml", "self_provider_id = \"edge-1\"\n");
    let config = load_config(Some(&path)).unwrap();

    assert_eq!(config.self_provider_id, "edge-1");
    assert_eq!(config.self_model, "gateway");
}

#[test]
fn update_lines_default_optional_fields() {
    let line: UpdateLine =
        serde_json::from_str(r#"{"provider":"p","service":"s","resource":"r"}"#).unwrap();
    assert_eq!(line.model, None);
    assert_eq!(line.value, None);
    assert_eq!(line.timestamp, None);

    let line: UpdateLine = serde_json::from_str(
        r#"{"model":"M","provider":"p","service":"s","resource":"r","value":3,"timestamp":42}"#,
    )
    .unwrap();
    assert_eq!(line.value, Some(json!(3)));
    assert_eq!(line.timestamp, Some(Timestamp::from_millis(42)));
}

// ── Commands ─────────────────────────────────────────────────────

#[test]
fn ingest_prints_events_and_persists() {
    let ws = Workspace::new();
    let file = ws.write(
        "updates.jsonl",
        concat!(
            r#"{"model":"Thermo","provider":"t1","service":"env","resource":"temp","value":20.5,"timestamp":100}"#,
            "\n\n",
            r#"{"provider":"t1","service":"env","resource":"temp","value":21,"timestamp":200}"#,
            "\n",
        ),
    );

    let events = ws.events(&["ingest", path_str(&file)]);
    let kinds: Vec<_> = events.iter().map(ChangeEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "addProvider",
            "addService",
            "addResource",
            "resourceValueUpdate",
            "metadataValueUpdate",
            "resourceValueUpdate",
            "metadataValueUpdate",
        ]
    );

    let providers = ws.dump();
    let ids: Vec<_> = providers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["gateway", "t1"]);
    assert_eq!(providers[1].value("env", "temp"), Some(&json!(21)));
}

#[test]
fn merge_register_and_link() {
    let ws = Workspace::new();
    let package = ws.write(
        "lighting.json",
        r#"{
            "uri": "https://vendor.example/lighting",
            "models": [
                {"name": "Lamp", "services": {"light": {"resources": {"on": {"value_type": "boolean"}}}}}
            ]
        }"#,
    );
    ws.run(&["register", path_str(&package)]);

    let trees = ws.write(
        "trees.json",
        r#"[
            {"id": "lamp-1", "model": "Lamp", "services": {"light": {"resources": {"on": {"value": true}}}}},
            {"id": "lamp-2", "model": "Lamp", "services": {}}
        ]"#,
    );
    let events = ws.events(&["merge", path_str(&trees)]);
    assert_eq!(events.iter().filter(|e| e.kind() == "addProvider").count(), 2);
    assert_eq!(
        events[0].target().package_uri.as_deref(),
        Some("https://vendor.example/lighting")
    );

    assert!(ws.events(&["link", "lamp-1", "lamp-2"]).is_empty());
    let providers = ws.dump();
    let lamp = providers.iter().find(|p| p.id == "lamp-1").unwrap();
    assert_eq!(lamp.admin.linked_providers, vec!["lamp-2"]);
    assert_eq!(lamp.value("light", "on"), Some(&json!(true)));
}

#[test]
fn delete_removes_provider() {
    let ws = Workspace::new();
    let file = ws.write(
        "updates.jsonl",
        r#"{"model":"Plug","provider":"plug-1","service":"power","resource":"watts","value":5,"timestamp":1}"#,
    );
    ws.run(&["ingest", path_str(&file)]);

    let events = ws.events(&["delete", "plug-1"]);
    assert_eq!(events.last().map(ChangeEvent::kind), Some("removeProvider"));
    assert!(ws.dump().iter().all(|p| p.id != "plug-1"));
}

#[test]
fn failing_command_reports_error() {
    let ws = Workspace::new();
    let db = ws.db();
    let args = Args::try_parse_from([
        "sensorgate",
        "--db",
        db.to_str().unwrap(),
        "delete",
        "gateway",
    ])
    .unwrap();
    let mut out = Vec::new();
    let err = run(&args, &mut out).unwrap_err();
    assert!(err.to_string().contains("protected"), "{err}");
}
