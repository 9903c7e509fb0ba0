use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn run_capgate_with_env(dir: &TempDir, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_capgate"));
    cmd.env("CAPGATE_DIR", dir.path())
        .env("CAPGATE_DISABLE_DISK_LOGS", "0")
        // Nothing listens here; validation probes fail fast.
        .env("CAPGATE_PROVIDER_BASE_URL", "http://127.0.0.1:9")
        .env("CAPGATE_VALIDATION_TIMEOUT_MS", "2000")
        .env_remove("API_KEY")
        .env_remove("CAPGATE_USER")
        .env_remove("CAPGATE_FALLBACK_ENV")
        .env_remove("CAPGATE_STORE_TIMEOUT_MS")
        .env_remove("CAPGATE_LOG");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.args(args).output().expect("failed to run capgate binary")
}

fn run_capgate(dir: &TempDir, args: &[&str]) -> Output {
    run_capgate_with_env(dir, args, &[])
}

fn assert_ok_json(output: Output, args: &[&str]) -> Value {
    assert!(
        output.status.success(),
        "command failed: capgate {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON")
}

fn run_ok_json(dir: &TempDir, args: &[&str]) -> Value {
    assert_ok_json(run_capgate(dir, args), args)
}

fn run_err_text(dir: &TempDir, args: &[&str]) -> String {
    let output = run_capgate(dir, args);
    assert!(
        !output.status.success(),
        "command unexpectedly succeeded: capgate {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn fresh_install_status_is_unknown_and_offline() {
    let dir = TempDir::new().unwrap();
    let status = run_ok_json(&dir, &["status"]);
    assert_eq!(status["status"]["state"], "unknown");
    assert_eq!(status["status"]["offline"], true);
    assert_eq!(status["status"]["aiEnabled"], true);
    assert_eq!(status["status"]["fallbackConfigured"], false);
    assert_eq!(
        status["status"]["strategies"],
        serde_json::json!(["cache_flag", "secret_store", "environment"])
    );
    assert_eq!(status["config"]["secretStoreTimeoutMs"], 2000);
}

#[test]
fn deployment_fallback_brings_primary_online_anonymously() {
    let dir = TempDir::new().unwrap();
    let args = ["status"];
    let status = assert_ok_json(
        run_capgate_with_env(&dir, &args, &[("API_KEY", "AIza-deploy")]),
        &args,
    );
    assert_eq!(status["status"]["state"], "online");
    assert_eq!(status["status"]["fallbackConfigured"], true);

    let args = ["resolve"];
    let resolved = assert_ok_json(
        run_capgate_with_env(
            &dir,
            &args,
            &[("CAPGATE_FALLBACK_ENV", "MY_KEY"), ("MY_KEY", "AIza-custom")],
        ),
        &args,
    );
    assert_eq!(resolved["client"]["source"], "environment");
}

#[test]
fn store_requires_a_signed_in_user() {
    let dir = TempDir::new().unwrap();
    let err = run_err_text(&dir, &["store", "--provider", "openai", "--key", "sk-1"]);
    assert!(err.contains("identity session is required"), "stderr: {err}");
}

#[test]
fn stored_secondary_key_resolves_without_leaking_value() {
    let dir = TempDir::new().unwrap();
    let stored = run_ok_json(
        &dir,
        &["--user", "u1", "store", "--provider", "openai", "--key", "sk-secret-1"],
    );
    assert_eq!(stored["stored"], true);
    let fingerprint = stored["fingerprint"].as_str().unwrap().to_string();
    assert_eq!(fingerprint.len(), 12);

    let keys = run_ok_json(&dir, &["--user", "u1", "keys"]);
    assert_eq!(keys["openai"], true);
    assert_eq!(keys["gemini"], false);

    let other_user = run_ok_json(&dir, &["--user", "u2", "keys"]);
    assert_eq!(other_user["openai"], false);

    let output = run_capgate(&dir, &["--user", "u1", "resolve", "--provider", "openai"]);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(!stdout.contains("sk-secret-1"));
    let resolved: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(resolved["client"]["source"], "secret_store");
    assert_eq!(resolved["client"]["fingerprint"], fingerprint.as_str());

    let err = run_err_text(&dir, &["resolve", "--provider", "openai"]);
    assert!(err.contains("identity session is required"), "stderr: {err}");

    let audit = run_ok_json(&dir, &["audit", "--limit", "5"]);
    assert_eq!(audit[0]["kind"], "credential.store");
    assert_eq!(audit[0]["fingerprint"], fingerprint.as_str());
    assert!(!audit.to_string().contains("sk-secret-1"));
}

#[test]
fn onboarding_then_guard_runs_from_cache_flag() {
    let dir = TempDir::new().unwrap();
    let onboarded = run_ok_json(
        &dir,
        &["--user", "u1", "onboard", "--key", "AIza-1", "--skip-validation"],
    );
    assert_eq!(onboarded["step"], "done");
    assert_eq!(onboarded["stored"]["validated"], false);
    assert!(onboarded["stored"]["warning"]
        .as_str()
        .unwrap()
        .contains("validation skipped"));
    assert!(!onboarded["stored"]["warning"]
        .as_str()
        .unwrap()
        .contains("failed"));
    assert_eq!(onboarded["state"], "online");

    let checked = run_ok_json(&dir, &["--user", "u1", "check"]);
    assert_eq!(checked["outcome"], "ran");
    assert_eq!(checked["client"]["source"], "cached");

    let materialized = run_ok_json(&dir, &["--user", "u1", "resolve", "--materialize"]);
    assert_eq!(materialized["client"]["source"], "secret_store");
}

#[test]
fn failed_validation_probe_still_keeps_the_key() {
    let dir = TempDir::new().unwrap();
    let onboarded = run_ok_json(&dir, &["--user", "u1", "onboard", "--key", "AIza-unreachable"]);
    assert_eq!(onboarded["stored"]["validated"], false);
    assert!(onboarded["stored"]["warning"].is_string());

    let keys = run_ok_json(&dir, &["--user", "u1", "keys"]);
    assert_eq!(keys["gemini"], true);
}

#[test]
fn guard_routes_by_missing_piece() {
    let dir = TempDir::new().unwrap();
    let anonymous = run_ok_json(&dir, &["check"]);
    assert_eq!(anonymous["outcome"], "sign_in_required");
    assert_eq!(anonymous["navigation"][0]["kind"], "sign_in");

    let no_key = run_ok_json(&dir, &["--user", "u1", "check"]);
    assert_eq!(no_key["outcome"], "onboarding_required");
    assert_eq!(no_key["navigation"][0]["kind"], "onboarding");
    assert_eq!(no_key["navigation"][0]["reopened"], false);
}

#[test]
fn unprovisioned_store_shows_diagnostic() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.json"),
        r#"{"requireExistingStore": true}"#,
    )
    .unwrap();
    let checked = run_ok_json(&dir, &["--user", "u1", "check"]);
    assert_eq!(checked["outcome"], "store_unavailable");
    assert_eq!(checked["navigation"][0]["kind"], "store_diagnostic");

    let err = run_err_text(&dir, &["--user", "u1", "store", "--provider", "gemini", "--key", "k"]);
    assert!(err.contains("unavailable"), "stderr: {err}");
}

#[test]
fn classify_reports_decision_and_navigation() {
    let dir = TempDir::new().unwrap();
    let failure = run_ok_json(
        &dir,
        &["--user", "u1", "classify", "--message", "[400] API_KEY_INVALID"],
    );
    assert_eq!(failure["classification"], "capability_failure");
    assert_eq!(failure["state"], "offline");
    assert_eq!(failure["navigation"][0]["reopened"], true);

    let transient = run_ok_json(&dir, &["classify", "--status", "429"]);
    assert_eq!(transient["classification"], "transient");
    assert_eq!(transient["navigation"], serde_json::json!([]));

    let anonymous = run_ok_json(&dir, &["classify", "--message", "NEURAL_LINK_DISCONNECTED"]);
    assert_eq!(anonymous["classification"], "capability_failure");
    assert_eq!(anonymous["navigation"], serde_json::json!([]));
}

#[test]
fn disable_needs_confirmation_and_enable_restores() {
    let dir = TempDir::new().unwrap();
    let pending = run_ok_json(&dir, &["--user", "u1", "disable"]);
    assert_eq!(pending["step"], "confirming_disable");
    assert_eq!(pending["aiEnabled"], true);

    let disabled = run_ok_json(&dir, &["--user", "u1", "disable", "--confirm"]);
    assert_eq!(disabled["step"], "disabled");
    assert_eq!(disabled["aiEnabled"], false);

    let checked = run_ok_json(&dir, &["--user", "u1", "check"]);
    assert_eq!(checked["outcome"], "disabled");

    let anonymous = run_ok_json(&dir, &["enable"]);
    assert_eq!(anonymous["enabled"], false);
    assert_eq!(anonymous["navigation"][0]["kind"], "sign_in");

    let enabled = run_ok_json(&dir, &["--user", "u1", "enable"]);
    assert_eq!(enabled["aiEnabled"], true);
}

#[test]
fn empty_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = run_err_text(&dir, &["--user", "u1", "onboard", "--key", "   "]);
    assert!(err.contains("empty"), "stderr: {err}");
}
