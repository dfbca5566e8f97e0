use std::path::PathBuf;
use std::{fs, path::Path};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn path_as_str(path: &Path) -> &str {
    path.to_str().expect("path should be valid utf-8")
}

#[test]
fn verify_passes_for_cilium_fixture() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    cmd.arg("verify")
        .arg(fixture("fixtures/policies/cilium/l7.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("verify files=1 documents=1"))
        .stdout(predicate::str::contains("result errors=0 warnings=0"));
}

#[test]
fn verify_accepts_converted_output() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("out");
    let config = dir.path().join("settings.toml");
    fs::write(&config, "[translate]\nhost_policies = true\n").expect("write config");

    let mut convert = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    convert
        .arg("convert")
        .arg(fixture("fixtures/policies/calico/global.yaml"))
        .arg("--config")
        .arg(path_as_str(&config))
        .arg("--output")
        .arg(path_as_str(&out))
        .assert()
        .success();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    cmd.arg("verify")
        .arg(path_as_str(&out.join("calico/global.yaml")))
        .arg("--strict")
        .assert()
        .success()
        .stdout(predicate::str::contains("documents=2"))
        .stdout(predicate::str::contains("- none"));
}

#[test]
fn verify_fails_on_structural_errors() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("broken.yaml");
    fs::write(
        &input,
        r#"
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata: {name: broken, namespace: shop}
spec:
  ingress:
  - fromEndpoints: [{matchLabels: {app: a}}]
    fromEntities: [world]
"#,
    )
    .expect("write");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    cmd.arg("verify")
        .arg(path_as_str(&input))
        .assert()
        .failure()
        .stderr(predicate::str::contains("verify failed: 2 errors"))
        .stdout(predicate::str::contains("selector_count"))
        .stdout(predicate::str::contains("combined_l3_selectors"));
}

#[test]
fn verify_strict_fails_on_warnings() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("no-namespace.yaml");
    fs::write(
        &input,
        r#"
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata: {name: loose}
spec:
  endpointSelector: {}
  ingress: [{}]
"#,
    )
    .expect("write");

    let mut lenient = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    lenient
        .arg("verify")
        .arg(path_as_str(&input))
        .assert()
        .success()
        .stdout(predicate::str::contains("missing_namespace"));

    let mut strict = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    strict
        .arg("verify")
        .arg(path_as_str(&input))
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("verify failed in strict mode"));
}

#[test]
fn verify_json_lists_issues() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("k8s.yaml");
    fs::copy(fixture("fixtures/policies/k8s/frontend-allow.yaml"), &input).expect("copy");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cni-migrate"));
    let assert = cmd
        .arg("verify")
        .arg(path_as_str(&input))
        .arg("--format")
        .arg("json")
        .assert()
        .failure();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf-8");
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("json report");
    assert_eq!(report["errors"], 2);
    assert_eq!(report["issues"][0]["code"], "unexpected_api_version");
    assert_eq!(report["issues"][1]["severity"], "error");
}
