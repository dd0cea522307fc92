mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::{write_zip, Entry, Sandbox};
use plexdeploy_linux::lock::HostLock;

fn plexdeploy(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plexdeploy"))
        .env("PLEXDEPLOY_TEST_ALLOW_NON_ROOT", "1")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run plexdeploy")
}

fn describe(out: &Output) -> String {
    format!(
        "status={:?}, stdout={}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

#[test]
fn e2e_addon_install_list_remove_in_sandbox() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.path().join("installer-config.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec_pretty(&sandbox.config).unwrap(),
    )
    .unwrap();
    std::fs::create_dir_all(sandbox.layout().instance_dir("plextickets")).unwrap();

    let archive = sandbox.path().join("Welcome-main.zip");
    write_zip(
        &archive,
        &[
            Entry::File("Welcome/config.yml", "message: hi\n"),
            Entry::File("Welcome/index.js", "x"),
        ],
    );

    let out = plexdeploy(
        &config_path,
        &["addon", "install", "plextickets", &archive.to_string_lossy()],
    );
    assert!(out.status.success(), "install failed: {}", describe(&out));
    let addon_dir = sandbox.layout().addons_dir("plextickets").join("Welcome");
    assert!(addon_dir.join("config.yml").is_file());

    let out = plexdeploy(&config_path, &["--json", "addon", "list", "plextickets"]);
    assert!(out.status.success(), "list failed: {}", describe(&out));
    let listed: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(listed[0]["name"], "Welcome");

    let out = plexdeploy(
        &config_path,
        &["addon", "check-config", "plextickets", "Welcome"],
    );
    assert!(out.status.success(), "check-config failed: {}", describe(&out));

    let out = plexdeploy(&config_path, &["addon", "remove", "plextickets", "Welcome"]);
    assert!(out.status.success(), "remove failed: {}", describe(&out));
    assert!(!addon_dir.exists());
}

#[test]
fn e2e_install_without_archive_exits_with_abort_code() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.path().join("installer-config.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec_pretty(&sandbox.config).unwrap(),
    )
    .unwrap();

    let out = plexdeploy(&config_path, &["--json", "install", "plexstaff"]);
    assert_eq!(out.status.code(), Some(3), "{}", describe(&out));
    let outcome: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(outcome["status"], "aborted");
    assert!(!sandbox.layout().install_root().exists());
}

#[test]
fn e2e_domain_requires_email() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.path().join("installer-config.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec_pretty(&sandbox.config).unwrap(),
    )
    .unwrap();

    let out = plexdeploy(
        &config_path,
        &["install", "plexstaff", "--domain", "staff.example.com"],
    );
    assert!(!out.status.success(), "{}", describe(&out));
}

#[test]
fn e2e_doctor_fails_fast_while_lock_is_held() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.path().join("installer-config.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec_pretty(&sandbox.config).unwrap(),
    )
    .unwrap();

    let held = HostLock::acquire(&sandbox.config.lock_file).unwrap();
    let out = plexdeploy(&config_path, &["--json", "doctor"]);
    assert_eq!(out.status.code(), Some(1), "{}", describe(&out));
    assert!(out.stdout.is_empty(), "{}", describe(&out));
    drop(held);

    let out = plexdeploy(&config_path, &["--json", "doctor"]);
    assert_ne!(out.status.code(), Some(1), "{}", describe(&out));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(report["results"].is_array());
}

#[test]
fn e2e_service_control_requires_installed_instance() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.path().join("installer-config.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec_pretty(&sandbox.config).unwrap(),
    )
    .unwrap();

    let out = plexdeploy(&config_path, &["service", "restart", "ghost"]);
    assert_eq!(out.status.code(), Some(1), "{}", describe(&out));
    let out = plexdeploy(&config_path, &["ssl", "renew", "--dry-run", "--force"]);
    assert!(!out.status.success(), "{}", describe(&out));
}
