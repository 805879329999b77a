//! Integration tests: decode native change arrays from fixtures.
//!
//! Each fixture in tests/fixtures/ has:
//! - native: index and range arrays as a native engine reports them; a
//!   missing key means the engine did not supply that form
//! - expect: the serialized change-set the builder must produce

use serde_json::Value;
use snapflow_core::{Changeset, ChangesetBuilder};
use std::path::PathBuf;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn indices(native: &Value, key: &str) -> Option<Vec<i64>> {
    native.get(key).map(|list| {
        list.as_array()
            .unwrap_or_else(|| panic!("{key} must be an array"))
            .iter()
            .map(|v| v.as_i64().unwrap_or_else(|| panic!("{key} holds a non-integer")))
            .collect()
    })
}

fn pairs(native: &Value, key: &str) -> Option<Vec<(i64, i64)>> {
    native.get(key).map(|list| {
        list.as_array()
            .unwrap_or_else(|| panic!("{key} must be an array"))
            .iter()
            .map(|pair| {
                let pair = pair.as_array().expect("pairs are two-element arrays");
                (
                    pair[0].as_i64().expect("integer"),
                    pair[1].as_i64().expect("integer"),
                )
            })
            .collect()
    })
}

fn build(native: &Value) -> Changeset {
    let mut builder = ChangesetBuilder::new();
    if let Some(list) = indices(native, "insertions") {
        builder.set_insertion_indices(list.len(), |i| list[i]);
    }
    if let Some(list) = indices(native, "deletions") {
        builder.set_deletion_indices(list.len(), |i| list[i]);
    }
    if let Some(list) = indices(native, "modifications") {
        builder.set_modification_indices(list.len(), |i| list[i]);
    }
    if let Some(list) = indices(native, "modifications_after") {
        builder.set_modification_indices_after(list.len(), |i| list[i]);
    }
    if let Some(list) = pairs(native, "moves") {
        builder.set_moves(list.len(), |i| list[i].0, |i| list[i].1);
    }
    if let Some(list) = pairs(native, "insertion_ranges") {
        builder.set_insertion_ranges(list.len(), |i| list[i].0, |i| list[i].1);
    }
    if let Some(list) = pairs(native, "deletion_ranges") {
        builder.set_deletion_ranges(list.len(), |i| list[i].0, |i| list[i].1);
    }
    if let Some(list) = pairs(native, "modification_ranges") {
        builder.set_modification_ranges(list.len(), |i| list[i].0, |i| list[i].1);
    }
    if let Some(list) = pairs(native, "modification_ranges_after") {
        builder.set_modification_ranges_after(list.len(), |i| list[i].0, |i| list[i].1);
    }
    builder.build()
}

fn run_fixture(name: &str) {
    let path = fixtures_dir().join(format!("{name}.json"));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    let fixture: Value = serde_json::from_str(&text)
        .unwrap_or_else(|e| panic!("failed to parse {}: {e}", path.display()));

    let changes = build(&fixture["native"]);
    let actual = serde_json::to_value(&changes).expect("failed to serialize change-set");
    assert_eq!(
        actual,
        fixture["expect"],
        "fixture {name}: change-set mismatch\n  actual: {}\n  expected: {}",
        serde_json::to_string_pretty(&actual).unwrap_or_default(),
        serde_json::to_string_pretty(&fixture["expect"]).unwrap_or_default()
    );
}

#[test]
fn coalesced_ranges() {
    run_fixture("coalesced-ranges");
}

#[test]
fn single_move() {
    run_fixture("single-move");
}

#[test]
fn shifted_modifications() {
    run_fixture("shifted-modifications");
}

#[test]
fn serialized_form_is_stable() {
    let native = serde_json::json!({
        "insertions": [1, 2],
        "deletion_ranges": [[0, 1]]
    });
    insta::assert_json_snapshot!(build(&native), @r#"
    {
      "insertions": [
        1,
        2
      ],
      "deletions": [
        0
      ],
      "modifications": [],
      "modifications_after": [],
      "moves": [],
      "insertion_ranges": [
        {
          "start": 1,
          "end": 3
        }
      ],
      "deletion_ranges": [
        {
          "start": 0,
          "end": 1
        }
      ],
      "modification_ranges": [],
      "modification_ranges_after": []
    }
    "#);
}
