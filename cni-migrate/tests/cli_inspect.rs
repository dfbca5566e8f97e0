use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

#[test]
fn inspect_prints_calico_rules_with_actions() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    cmd.arg("inspect")
        .arg(fixture("fixtures/policies/calico/ordered.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "document index=1 dialect=calico kind=NetworkPolicy name=shop/api-rules",
        ))
        .stdout(predicate::str::contains("order=200"))
        .stdout(predicate::str::contains("- [0] log peers=all ports=all"))
        .stdout(predicate::str::contains(
            "- [1] deny peers=cidr(10.66.0.0/16) ports=all",
        ))
        .stdout(predicate::str::contains("TCP/9000-9010"));
}

#[test]
fn inspect_json_lists_every_document() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    let assert = cmd
        .arg("inspect")
        .arg(fixture("fixtures/policies/k8s/mixed.yaml"))
        .arg("--format")
        .arg("json")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf-8");
    let entries: serde_json::Value = serde_json::from_str(&stdout).expect("json");
    let entries = entries.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["document"]["name"], "web-egress");
    assert_eq!(entries[1]["document"]["name"], "metrics");
}

#[test]
fn inspect_reports_dialect_mismatch_per_document() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    cmd.arg("inspect")
        .arg(fixture("fixtures/policies/k8s/frontend-allow.yaml"))
        .arg("--from")
        .arg("calico")
        .assert()
        .success()
        .stdout(predicate::str::contains("rejected: schema violation"));
}
