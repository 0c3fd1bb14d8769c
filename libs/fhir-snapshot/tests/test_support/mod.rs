#![allow(dead_code)]

//! Fixture packages for end-to-end engine tests: a test-sized core library
//! and a profile package, written into a temporary package cache in the
//! `<cache>/<id>#<version>/package/` layout.

use anvil_cache::CacheMode;
use anvil_package::PackageRef;
use anvil_snapshot::{EngineConfig, SnapshotEngine};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

pub const PROFILES_PKG: &str = "test.profiles#1.0.0";
pub const BROKEN_PKG: &str = "test.broken#1.0.0";

/// One snapshot element with realistic base information.
fn elem(id: &str, min: u32, max: &str, base_max: &str, type_code: Option<&str>) -> Value {
    let mut element = json!({
        "id": id,
        "path": id,
        "min": min,
        "max": max,
        "base": {"path": id, "min": min, "max": base_max}
    });
    if let Some(code) = type_code {
        element["type"] = json!([{"code": code}]);
    }
    element
}

fn specialization(id: &str, kind: &str, elements: Vec<Value>) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": id,
        "url": format!("http://hl7.org/fhir/StructureDefinition/{}", id),
        "name": id,
        "status": "active",
        "kind": kind,
        "abstract": false,
        "type": id,
        "derivation": "specialization",
        "snapshot": {"element": elements}
    })
}

fn primitive(id: &str) -> Value {
    specialization(id, "primitive-type", vec![elem(id, 0, "*", "*", None)])
}

fn core_resources() -> Vec<Value> {
    let observation_value = json!({
        "id": "Observation.value[x]",
        "path": "Observation.value[x]",
        "min": 0,
        "max": "1",
        "base": {"path": "Observation.value[x]", "min": 0, "max": "1"},
        "type": [{"code": "Quantity"}, {"code": "string"}]
    });
    let extension_value = json!({
        "id": "Extension.value[x]",
        "path": "Extension.value[x]",
        "min": 0,
        "max": "1",
        "base": {"path": "Extension.value[x]", "min": 0, "max": "1"},
        "type": [{"code": "Quantity"}, {"code": "string"}]
    });

    vec![
        specialization(
            "Element",
            "complex-type",
            vec![
                elem("Element", 0, "*", "*", None),
                elem("Element.id", 0, "1", "1", Some("string")),
                elem("Element.extension", 0, "*", "*", Some("Extension")),
            ],
        ),
        specialization(
            "Extension",
            "complex-type",
            vec![
                elem("Extension", 0, "*", "*", None),
                elem("Extension.id", 0, "1", "1", Some("string")),
                elem("Extension.extension", 0, "*", "*", Some("Extension")),
                elem("Extension.url", 1, "1", "1", Some("uri")),
                extension_value,
            ],
        ),
        specialization(
            "Patient",
            "resource",
            vec![
                elem("Patient", 0, "*", "*", None),
                elem("Patient.identifier", 0, "*", "*", Some("Identifier")),
                elem("Patient.name", 0, "*", "*", Some("HumanName")),
                elem("Patient.gender", 0, "1", "1", Some("code")),
                elem("Patient.birthDate", 0, "1", "1", Some("date")),
            ],
        ),
        specialization(
            "HumanName",
            "complex-type",
            vec![
                elem("HumanName", 0, "*", "*", None),
                elem("HumanName.use", 0, "1", "1", Some("code")),
                elem("HumanName.family", 0, "1", "1", Some("string")),
                elem("HumanName.given", 0, "*", "*", Some("string")),
            ],
        ),
        specialization(
            "Identifier",
            "complex-type",
            vec![
                elem("Identifier", 0, "*", "*", None),
                elem("Identifier.use", 0, "1", "1", Some("code")),
                elem("Identifier.system", 0, "1", "1", Some("uri")),
                elem("Identifier.value", 0, "1", "1", Some("string")),
            ],
        ),
        specialization(
            "Quantity",
            "complex-type",
            vec![
                elem("Quantity", 0, "*", "*", None),
                elem("Quantity.value", 0, "1", "1", Some("decimal")),
                elem("Quantity.unit", 0, "1", "1", Some("string")),
                elem("Quantity.system", 0, "1", "1", Some("uri")),
                elem("Quantity.code", 0, "1", "1", Some("code")),
            ],
        ),
        specialization(
            "Observation",
            "resource",
            vec![
                elem("Observation", 0, "*", "*", None),
                elem("Observation.status", 1, "1", "1", Some("code")),
                observation_value,
            ],
        ),
        specialization(
            "Composition",
            "resource",
            vec![
                elem("Composition", 0, "*", "*", None),
                elem("Composition.date", 1, "1", "1", Some("date")),
                elem("Composition.title", 1, "1", "1", Some("string")),
            ],
        ),
        primitive("string"),
        primitive("uri"),
        primitive("code"),
        primitive("date"),
        primitive("decimal"),
    ]
}

fn profile(id: &str, type_name: &str, base: &str, differential: Vec<Value>) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": id,
        "url": format!("http://example.org/fhir/StructureDefinition/{}", id),
        "name": id,
        "status": "active",
        "kind": "resource",
        "abstract": false,
        "type": type_name,
        "baseDefinition": base,
        "derivation": "constraint",
        "differential": {"element": differential}
    })
}

fn profile_resources() -> Vec<Value> {
    vec![
        profile(
            "ext-hearing-loss",
            "Extension",
            "http://hl7.org/fhir/StructureDefinition/Extension",
            vec![
                json!({"id": "Extension", "path": "Extension", "short": "Hearing loss marker"}),
                json!({
                    "id": "Extension.url",
                    "path": "Extension.url",
                    "fixedUri": "http://example.org/fhir/StructureDefinition/ext-hearing-loss"
                }),
                json!({"id": "Extension.value[x]", "path": "Extension.value[x]", "min": 1}),
            ],
        ),
        profile(
            "obs-value-quantity",
            "Observation",
            "http://hl7.org/fhir/StructureDefinition/Observation",
            vec![
                json!({"id": "Observation.valueQuantity", "path": "Observation.valueQuantity", "min": 1}),
                json!({
                    "id": "Observation.valueQuantity.code",
                    "path": "Observation.valueQuantity.code",
                    "fixedCode": "dB"
                }),
            ],
        ),
        profile(
            "comp-issue-date",
            "Composition",
            "http://hl7.org/fhir/StructureDefinition/Composition",
            vec![json!({
                "id": "Composition.date:IssueDate",
                "path": "Composition.date",
                "sliceName": "IssueDate",
                "min": 1
            })],
        ),
        profile(
            "pat-slices",
            "Patient",
            "http://hl7.org/fhir/StructureDefinition/Patient",
            vec![
                json!({
                    "id": "Patient.identifier",
                    "path": "Patient.identifier",
                    "slicing": {
                        "discriminator": [{"type": "value", "path": "system"}],
                        "rules": "open"
                    }
                }),
                json!({
                    "id": "Patient.identifier:mrn",
                    "path": "Patient.identifier",
                    "sliceName": "mrn",
                    "max": "1"
                }),
                json!({
                    "id": "Patient.identifier:mrn.system",
                    "path": "Patient.identifier.system",
                    "fixedUri": "http://hospital.example.org/mrn"
                }),
            ],
        ),
        profile(
            "pat-derived",
            "Patient",
            "http://example.org/fhir/StructureDefinition/pat-slices",
            vec![json!({"id": "Patient.gender", "path": "Patient.gender", "min": 1})],
        ),
    ]
}

fn broken_resources() -> Vec<Value> {
    let mut no_diff = profile(
        "no-diff",
        "Patient",
        "http://hl7.org/fhir/StructureDefinition/Patient",
        vec![],
    );
    if let Some(fields) = no_diff.as_object_mut() {
        fields.remove("differential");
    }

    let illegal_child = profile(
        "illegal-child",
        "Patient",
        "http://hl7.org/fhir/StructureDefinition/Patient",
        vec![json!({"id": "Patient.bogus", "path": "Patient.bogus", "min": 1})],
    );

    let mut fallback_prof = profile(
        "fallback-prof",
        "Patient",
        "http://hl7.org/fhir/StructureDefinition/Patient",
        vec![json!({"id": "Patient.bogus", "path": "Patient.bogus", "min": 1})],
    );
    fallback_prof["snapshot"] = json!({"element": [{"id": "Patient", "path": "Patient"}]});

    vec![no_diff, illegal_child, fallback_prof]
}

async fn write_package(cache: &Path, name: &str, version: &str, deps: Value, resources: &[Value]) {
    let dir = cache.join(format!("{}#{}", name, version)).join("package");
    tokio::fs::create_dir_all(&dir).await.expect("create package dir");

    let manifest = json!({
        "name": name,
        "version": version,
        "dependencies": deps,
        "author": "test"
    });
    tokio::fs::write(dir.join("package.json"), manifest.to_string())
        .await
        .expect("write manifest");

    for resource in resources {
        let filename = format!(
            "StructureDefinition-{}.json",
            resource["id"].as_str().expect("resource id")
        );
        tokio::fs::write(dir.join(filename), resource.to_string())
            .await
            .expect("write resource");
    }
}

/// Build a package cache holding the core library, the profile package, and
/// a package of malformed profiles.
pub async fn build_fixture_cache() -> TempDir {
    let tmp = TempDir::new().expect("temp dir");
    write_package(tmp.path(), "hl7.fhir.r4.core", "4.0.1", json!({}), &core_resources()).await;
    write_package(
        tmp.path(),
        "test.profiles",
        "1.0.0",
        json!({"hl7.fhir.r4.core": "4.0.1"}),
        &profile_resources(),
    )
    .await;
    write_package(
        tmp.path(),
        "test.broken",
        "1.0.0",
        json!({"hl7.fhir.r4.core": "4.0.1"}),
        &broken_resources(),
    )
    .await;
    tmp
}

pub async fn engine(tmp: &TempDir, mode: CacheMode) -> SnapshotEngine {
    engine_for(tmp, mode, PROFILES_PKG).await
}

pub async fn engine_for(tmp: &TempDir, mode: CacheMode, context: &str) -> SnapshotEngine {
    SnapshotEngine::create(EngineConfig {
        context: vec![PackageRef::parse(context)],
        cache_path: tmp.path().to_path_buf(),
        cache_mode: mode,
        ..Default::default()
    })
    .await
    .expect("engine creation")
}

/// All profile filenames of the fixture profile package, sorted.
pub fn profile_filenames() -> Vec<String> {
    let mut names: Vec<String> = profile_resources()
        .iter()
        .map(|p| format!("StructureDefinition-{}.json", p["id"].as_str().expect("id")))
        .collect();
    names.sort();
    names
}
