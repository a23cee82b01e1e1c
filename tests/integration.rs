use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

use homewatch::models::HomeworkRecord;
use homewatch::store::sqlite::SqliteStore;
use homewatch::store::upsert_records;

fn hwk_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("hwk");
    path
}

fn write_config(root: &Path, port: u16, verify_signatures: bool) -> PathBuf {
    let config_content = format!(
        r#"[portal]
username = "student1"
student_id = "AB12345"
student_name = "Student Test"

[store]
db_path = "{root}/data/homework.db"

[server]
host = "127.0.0.1"
port = {port}
verify_signatures = {verify_signatures}
"#,
        root = root.display(),
        port = port,
        verify_signatures = verify_signatures,
    );

    let config_path = root.join("homewatch.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), 7331, false);
    (tmp, config_path)
}

fn run_hwk(root: &Path, config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hwk_binary();
    let output = Command::new(&binary)
        .current_dir(root)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hwk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Inserts records straight through the library so CLI read commands have
/// something to print.
fn seed_store(config_root: &Path, records: Vec<HomeworkRecord>) {
    let db_path = config_root.join("data").join("homework.db");
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let pool = homewatch::db::connect(&db_path).await.unwrap();
        homewatch::migrate::run_migrations(&pool).await.unwrap();
        let store = SqliteStore::new(pool);
        let written = upsert_records(&store, &records).await;
        assert_eq!(written as usize, records.len());
    });
}

fn record(date: &str, hour: &str, subject: &str, text: &str) -> HomeworkRecord {
    HomeworkRecord {
        date: date.to_string(),
        hour: hour.to_string(),
        subject: subject.to_string(),
        description: String::new(),
        homework_text: text.to_string(),
        due_date: None,
        teacher: Some("כהן".to_string()),
        class_description: None,
    }
}

#[test]
fn test_init_writes_config_and_database() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("homewatch.toml");

    let (stdout, stderr, success) = run_hwk(tmp.path(), &config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("starter config"));
    assert!(stdout.contains("initialized"));
    assert!(config_path.exists(), "config file should exist after init");
    // The starter config points at ./homework.db, resolved against the cwd.
    assert!(tmp.path().join("homework.db").exists());
}

#[test]
fn test_reinit_refuses_to_overwrite() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hwk(tmp.path(), &config_path, &["init"]);
    assert!(!success, "init over an existing config should fail");
    assert!(
        stderr.contains("refusing"),
        "Should refuse to overwrite, got: {}",
        stderr
    );
}

#[test]
fn test_list_empty_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hwk(tmp.path(), &config_path, &["list"]);
    assert!(success, "list failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No homework records."));
}

#[test]
fn test_today_empty_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_hwk(tmp.path(), &config_path, &["today"]);
    assert!(success);
    assert!(stdout.contains("No homework records."));
}

#[test]
fn test_list_prints_seeded_records() {
    let (tmp, config_path) = setup_test_env();
    seed_store(
        tmp.path(),
        vec![
            record("2025-10-26", "2", "מתמטיקה", "עמוד 12 תרגילים 1-5"),
            record("2025-10-27", "1", "אנגלית", "לקרוא פרק 3"),
        ],
    );

    let (stdout, stderr, success) = run_hwk(tmp.path(), &config_path, &["list"]);
    assert!(success, "list failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2025-10-26 (2) מתמטיקה: עמוד 12 תרגילים 1-5 [כהן]"));
    assert!(stdout.contains("2025-10-27 (1) אנגלית: לקרוא פרק 3"));
    assert!(stdout.contains("2 record(s)"));

    // --date narrows to one day.
    let (stdout, _, _) = run_hwk(tmp.path(), &config_path, &["list", "--date", "2025-10-27"]);
    assert!(stdout.contains("אנגלית"));
    assert!(!stdout.contains("מתמטיקה"));
    assert!(stdout.contains("1 record(s)"));

    // --from is inclusive.
    let (stdout, _, _) = run_hwk(tmp.path(), &config_path, &["list", "--from", "2025-10-26"]);
    assert!(stdout.contains("2 record(s)"));
}

#[test]
fn test_list_rejects_date_and_from_together() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hwk(
        tmp.path(),
        &config_path,
        &["list", "--date", "2025-10-26", "--from", "2025-10-26"],
    );
    assert!(!success, "--date and --from together should fail");
    assert!(stderr.contains("not both"), "got: {}", stderr);
}

#[test]
fn test_scrape_unknown_mode_errors() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hwk(tmp.path(), &config_path, &["scrape", "--mode", "bogus"]);
    assert!(!success, "Unknown mode should fail");
    assert!(stderr.contains("unknown mode"), "got: {}", stderr);
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_hwk(tmp.path(), &config_path, &["list"]);
    assert!(!success, "Missing config should fail");
    assert!(
        stderr.contains("Failed to read config"),
        "got: {}",
        stderr
    );
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), 0, false);

    let (_, stderr, success) = run_hwk(tmp.path(), &config_path, &["list"]);
    assert!(!success, "port 0 should be rejected");
    assert!(stderr.contains("server.port"), "got: {}", stderr);
}

/// Kills the server process when a test finishes or panics.
struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_server(root: &Path, config_path: &Path, envs: &[(&str, &str)]) -> ServerGuard {
    let binary = hwk_binary();
    let mut cmd = Command::new(&binary);
    cmd.current_dir(root)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        // The quick-command and signature paths never call the LLM, so any
        // non-empty key satisfies startup.
        .env("ANTHROPIC_API_KEY", "test-key")
        .env_remove("TWILIO_ACCOUNT_SID")
        .env_remove("TWILIO_AUTH_TOKEN")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (name, value) in envs {
        cmd.env(name, value);
    }
    let child = cmd
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to spawn hwk serve at {:?}: {}", binary, e));
    ServerGuard(child)
}

fn wait_for_health(port: u16) {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return;
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    panic!("server on port {} never became healthy", port);
}

#[test]
fn test_serve_health_webhook_and_stats() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), 7341, false);

    let _server = spawn_server(tmp.path(), &config_path, &[]);
    wait_for_health(7341);

    let health = reqwest::blocking::get("http://127.0.0.1:7341/health")
        .unwrap()
        .text()
        .unwrap();
    assert!(health.contains("\"status\":\"ok\""));

    // A quick command on an empty store gets the fixed reply as TwiML.
    let client = reqwest::blocking::Client::new();
    let reply = client
        .post("http://127.0.0.1:7341/webhook/whatsapp")
        .form(&[("From", "whatsapp:+972551234567"), ("Body", "הכל")])
        .send()
        .unwrap();
    assert!(reply.status().is_success());
    assert_eq!(
        reply.headers()["content-type"].to_str().unwrap(),
        "application/xml"
    );
    let body = reply.text().unwrap();
    assert!(body.contains("<Response><Message>"), "got: {}", body);
    assert!(body.contains("אין שיעורי בית"), "got: {}", body);

    let stats = reqwest::blocking::get("http://127.0.0.1:7341/stats")
        .unwrap()
        .text()
        .unwrap();
    assert!(stats.contains("\"messages_total\":1"), "got: {}", stats);
    assert!(stats.contains("\"records_stored\":0"), "got: {}", stats);
}

#[test]
fn test_serve_rejects_unsigned_webhook_when_verifying() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), 7342, true);

    let _server = spawn_server(
        tmp.path(),
        &config_path,
        &[("HW_WEBHOOK_SECRET", "test-secret")],
    );
    wait_for_health(7342);

    let client = reqwest::blocking::Client::new();
    let reply = client
        .post("http://127.0.0.1:7342/webhook/whatsapp")
        .form(&[("From", "whatsapp:+972551234567"), ("Body", "הכל")])
        .send()
        .unwrap();
    assert_eq!(reply.status().as_u16(), 401);
    let body = reply.text().unwrap();
    assert!(body.contains("unauthorized"), "got: {}", body);
}
