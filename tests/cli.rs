//! Drives the `lore` binary against a temporary config.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lore_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lore");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let guides = root.join("guides");
    fs::create_dir_all(&guides).unwrap();
    fs::write(
        guides.join("malenia.md"),
        "# Malenia\n\nWaterfowl dance: sprint away from the first flurry, then roll through the rest.",
    )
    .unwrap();
    fs::write(
        guides.join("radahn.txt"),
        "Radahn festival. Summon every helper and ride Torrent around the meteor.",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
path = "{root}/data/packs.sqlite"

[index]
dir = "{root}/data/index"

[chunking]
chunk_size = 120
overlap = 20

[retrieval]
top_k = 3
min_score = 0.0

[logging]
level = "warn"

[analytics]
query_log = "{root}/data/queries.jsonl"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("lore.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lore(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lore_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lore binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn added_pack_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Added pack "))
        .expect("pack id in output")
        .trim()
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_lore(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Initialized"));
    let (_, _, success) = run_lore(&config_path, &["init"]);
    assert!(success, "second init failed");
}

#[test]
fn test_pack_lifecycle() {
    let (tmp, config_path) = setup_test_env();
    let guides = tmp.path().join("guides");
    run_lore(&config_path, &["init"]);

    let (stdout, stderr, success) = run_lore(
        &config_path,
        &[
            "pack", "add", "--context", "elden-ring", "--name", "Bosses",
            "--file", guides.to_str().unwrap(),
            "--file", "/no/such/file.md",
            "--note", "Mohg: use the purifying crystal tear against nihil.",
        ],
    );
    assert!(success, "pack add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 of 3 sources indexed"), "got: {}", stdout);
    let id = added_pack_id(&stdout);

    let (stdout, _, _) = run_lore(&config_path, &["status", "--context", "elden-ring"]);
    assert!(stdout.contains("ready"), "got: {}", stdout);

    let (stdout, _, success) = run_lore(
        &config_path,
        &["query", "--context", "elden-ring", "waterfowl dance"],
    );
    assert!(success);
    assert!(stdout.contains("guides"), "got: {}", stdout);

    let (stdout, _, _) = run_lore(
        &config_path,
        &["ask", "--context", "elden-ring", "how do I beat mohg's nihil?"],
    );
    assert!(stdout.contains("=== Knowledge Base Context ==="), "got: {}", stdout);
    assert!(stdout.contains("crystal tear"));

    let log = fs::read_to_string(tmp.path().join("data").join("queries.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 1);

    let (stdout, _, _) = run_lore(&config_path, &["pack", "disable", &id]);
    assert!(stdout.contains("disabled"));
    let (stdout, _, _) = run_lore(
        &config_path,
        &["ask", "--context", "elden-ring", "how do I beat mohg's nihil?"],
    );
    assert!(stdout.contains("No knowledge context"), "got: {}", stdout);

    let (stdout, _, _) = run_lore(&config_path, &["pack", "list", "--context", "elden-ring"]);
    assert!(stdout.contains("[disabled]"));

    let (_, _, success) = run_lore(&config_path, &["pack", "remove", &id]);
    assert!(success);
    let (_, _, success) = run_lore(&config_path, &["pack", "remove", &id]);
    assert!(!success, "removing twice should fail");
}

#[test]
fn test_query_json_output() {
    let (_tmp, config_path) = setup_test_env();
    run_lore(
        &config_path,
        &[
            "pack", "add", "--context", "er", "--name", "Notes",
            "--note", "Radahn is easier with summons and Torrent.",
        ],
    );
    let (stdout, _, success) = run_lore(
        &config_path,
        &["query", "--context", "er", "--json", "radahn summons"],
    );
    assert!(success);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert!(hits[0]["score"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_add_requires_a_source() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_lore(
        &config_path,
        &["pack", "add", "--context", "er", "--name", "Empty"],
    );
    assert!(!success);
    assert!(stderr.contains("at least one"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(&config_path, "[store]\npath = \"x\"\n[index]\ndir = \"y\"\n[retrieval]\ntop_k = 50\n").unwrap();
    let (_, stderr, success) = run_lore(&config_path, &["status", "--context", "er"]);
    assert!(!success);
    assert!(stderr.contains("top_k"));
}
