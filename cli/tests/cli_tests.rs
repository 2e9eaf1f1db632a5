use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;
use test_case::test_case;

fn regionvault() -> Command {
    let mut cmd = Command::cargo_bin("regionvault").unwrap();
    cmd.env_remove("REGIONVAULT_PASSWORD")
        .env("REGIONVAULT_KDF_ITERATIONS", "1000")
        .env("REGIONVAULT_NO_LOCK", "true");
    cmd
}

/// Seal `plaintext` into `container` and return the blob length
fn seal(dir: &std::path::Path, plaintext: &[u8], container: &str) -> u64 {
    let input = dir.join("plain.txt");
    fs::write(&input, plaintext).unwrap();

    let output = regionvault()
        .args(["--json", "seal", "-p", "pw123", "--append", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(dir.join(container))
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    json["length"].as_u64().unwrap()
}

#[test]
fn test_seal_and_open_to_stdout() {
    let dir = tempdir().unwrap();
    let length = seal(dir.path(), b"hello world", "box.bin");

    regionvault()
        .args(["open", "-p", "pw123", "--length", &length.to_string(), "-i"])
        .arg(dir.path().join("box.bin"))
        .assert()
        .success()
        .stdout("hello world");
}

#[test]
fn test_open_second_blob_by_offset() {
    let dir = tempdir().unwrap();
    let first = seal(dir.path(), b"first", "box.bin");
    let second = seal(dir.path(), b"second", "box.bin");

    regionvault()
        .args([
            "open",
            "-p",
            "pw123",
            "--offset",
            &first.to_string(),
            "--length",
            &second.to_string(),
            "-i",
        ])
        .arg(dir.path().join("box.bin"))
        .assert()
        .success()
        .stdout("second");
}

#[test]
fn test_password_from_environment() {
    let dir = tempdir().unwrap();
    let length = seal(dir.path(), b"via env", "box.bin");

    regionvault()
        .env("REGIONVAULT_PASSWORD", "pw123")
        .args(["open", "-n", "--length", &length.to_string(), "-i"])
        .arg(dir.path().join("box.bin"))
        .assert()
        .success()
        .stdout("via env");
}

#[test]
fn test_wrong_password_never_yields_plaintext() {
    let dir = tempdir().unwrap();
    let length = seal(dir.path(), b"hello world", "box.bin");

    regionvault()
        .args(["--json", "open", "-p", "wrong!", "--length", &length.to_string(), "-i"])
        .arg(dir.path().join("box.bin"))
        .assert()
        // A wrong key occasionally passes the padding check, but never yields the plaintext
        .stdout(predicate::str::contains("aGVsbG8gd29ybGQ=").not());
}

#[test_case("32", "invalid_input" ; "header only")]
#[test_case("4096", "io" ; "past end of file")]
fn test_open_error_kinds(length: &str, kind: &str) {
    let dir = tempdir().unwrap();
    seal(dir.path(), b"hello world", "box.bin");

    regionvault()
        .args(["--json", "open", "-p", "pw123", "--length", length, "-i"])
        .arg(dir.path().join("box.bin"))
        .assert()
        .failure()
        .stdout(predicate::str::contains(format!("\"error_kind\": \"{}\"", kind)));
}

#[test]
fn test_missing_password_in_non_interactive_mode() {
    let dir = tempdir().unwrap();
    let length = seal(dir.path(), b"hello world", "box.bin");

    regionvault()
        .args(["open", "-n", "--length", &length.to_string(), "-i"])
        .arg(dir.path().join("box.bin"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Password is required"));
}

#[test]
fn test_seal_refuses_to_overwrite() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("plain.txt");
    let container = dir.path().join("box.bin");
    fs::write(&input, b"data").unwrap();
    fs::write(&container, b"existing").unwrap();

    regionvault()
        .args(["seal", "-p", "pw123", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(&container)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    assert_eq!(fs::read(&container).unwrap(), b"existing");
}

#[test]
fn test_inspect_json() {
    let dir = tempdir().unwrap();
    let length = seal(dir.path(), b"hello world", "box.bin");

    regionvault()
        .args(["--json", "inspect", "--length", &length.to_string(), "-i"])
        .arg(dir.path().join("box.bin"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ciphertext_len\": 16"))
        .stdout(predicate::str::contains("\"block_aligned\": true"));
}

#[test]
fn test_self_test() {
    regionvault()
        .arg("self-test")
        .assert()
        .success()
        .stdout(predicate::str::contains("All self-tests passed"));
}

#[test]
fn test_invalid_config_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{"registry_capacity": 0}"#).unwrap();

    regionvault()
        .arg("--config")
        .arg(&config)
        .arg("self-test")
        .assert()
        .failure()
        .stderr(predicate::str::contains("registry_capacity"));
}
