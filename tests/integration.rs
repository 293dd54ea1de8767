use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const ALICE_KEY: &str = "00112233445566778899aabbccddeeff";

fn cvault_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cvault");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[vault]
root = "{}/vault"

[chunking]
max_tokens = 700

[retrieval]
final_limit = 12

[audit]
actor = "tester"

[signing.keys]
alice = "{}"
"#,
        root.display(),
        ALICE_KEY
    );

    let config_path = config_dir.join("cvault.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cvault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cvault_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cvault binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .to_string_lossy()
        .to_string()
}

fn import_files(config_path: &Path) {
    let (stdout, stderr, success) = run_cvault(config_path, &["import", &files_dir(config_path)]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_vault_layout() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cvault(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    let vault = tmp.path().join("vault");
    assert!(vault.join("objects").is_dir());
    assert!(vault.join("audit").is_dir());
    assert!(vault.join("index").join("documents.json").is_file());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cvault(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cvault(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_cvault(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_import_directory_and_stats() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cvault(&config_path, &["import", &files_dir(&config_path)]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("gamma.txt"));
    assert!(stderr.contains("Imported 3 files"));

    let (stdout, _, success) = run_cvault(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("Tombstones:  0"));
}

#[test]
fn test_import_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    import_files(&config_path);
    import_files(&config_path);

    let (stdout, _, _) = run_cvault(&config_path, &["stats"]);
    assert!(stdout.contains("Documents:   3"), "stats: {}", stdout);
}

#[test]
fn test_search_ranks_matching_document_first() {
    let (_tmp, config_path) = setup_test_env();
    import_files(&config_path);

    let (stdout, stderr, success) = run_cvault(&config_path, &["search", "Kubernetes Docker"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1."), "unexpected output: {}", stdout);
    assert!(first.contains("gamma.txt"), "unexpected first result: {}", first);
}

#[test]
fn test_search_empty_vault() {
    let (_tmp, config_path) = setup_test_env();
    run_cvault(&config_path, &["init"]);

    let (stdout, _, success) = run_cvault(&config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_evidence_pack_has_citations() {
    let (_tmp, config_path) = setup_test_env();
    import_files(&config_path);

    let (stdout, stderr, success) =
        run_cvault(&config_path, &["evidence", "PyTorch", "--limit", "2"]);
    assert!(success, "evidence failed: stdout={}, stderr={}", stdout, stderr);
    let pack: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let citations = pack["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 2);
    assert_eq!(citations[0]["doc_title"], "beta.md");
}

#[test]
fn test_fact_add_list_forget() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_cvault(
        &config_path,
        &["fact", "add", "fox", "is_a", "canine", "--confidence", "0.9"],
    );
    assert!(success);
    let fact_id = stdout.trim().to_string();
    assert!(fact_id.starts_with("fact_"));

    let (stdout, _, _) = run_cvault(&config_path, &["fact", "list"]);
    assert!(stdout.contains("fox is_a canine"));

    let (_, _, success) = run_cvault(&config_path, &["forget", &fact_id, "--reason", "outdated"]);
    assert!(success);

    let (stdout, _, _) = run_cvault(&config_path, &["fact", "list"]);
    assert!(stdout.contains("No facts."));

    let (stdout, _, _) = run_cvault(&config_path, &["fact", "list", "--all"]);
    assert!(stdout.contains("(forgotten)"));

    let (stdout, _, success) = run_cvault(&config_path, &["get", &fact_id]);
    assert!(success);
    assert!(stdout.contains("forgotten by tomb_"));
    assert!(stdout.contains("kind=fact"));
}

#[test]
fn test_fact_confidence_out_of_range_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_cvault(
        &config_path,
        &["fact", "add", "fox", "is_a", "canine", "--confidence", "1.5"],
    );
    assert!(!success);
    assert!(stderr.contains("confidence"));
}

#[test]
fn test_verify_detects_corrupt_object() {
    let (tmp, config_path) = setup_test_env();
    import_files(&config_path);

    let (stdout, _, success) = run_cvault(&config_path, &["verify"]);
    assert!(success, "verify failed on a clean vault: {}", stdout);
    assert!(stdout.contains("OK"));

    let objects = tmp.path().join("vault").join("objects");
    let shard = fs::read_dir(&objects).unwrap().next().unwrap().unwrap().path();
    let object = fs::read_dir(&shard).unwrap().next().unwrap().unwrap().path();
    fs::write(&object, b"bit rot").unwrap();

    let (stdout, stderr, success) = run_cvault(&config_path, &["verify"]);
    assert!(!success);
    assert!(stdout.contains("CORRUPT"));
    assert!(stderr.contains("verification failed"));
}

#[test]
fn test_export_audit_to_file() {
    let (tmp, config_path) = setup_test_env();
    import_files(&config_path);
    let output = tmp.path().join("out").join("audit.json");

    let (_, stderr, success) = run_cvault(
        &config_path,
        &["export-audit", "--output", output.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stderr.contains("Exported"));

    let package: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(package["format"], "cvault-audit/1");
    assert_eq!(package["range"]["from"], 0);
    assert_eq!(package["anchor_hash"], "0".repeat(64));
    assert!(!package["object_hashes"].as_array().unwrap().is_empty());
}

#[test]
fn test_sign_and_verify_frame() {
    let (tmp, config_path) = setup_test_env();
    let frame_path = tmp.path().join("frame.txt");
    fs::write(&frame_path, "[kind=note id=n1 | hello world]").unwrap();

    let (signed, stderr, success) = run_cvault(
        &config_path,
        &["sign", frame_path.to_str().unwrap(), "--signer", "alice"],
    );
    assert!(success, "sign failed: {}", stderr);
    assert!(signed.contains("kind=signature"));

    let signed_path = tmp.path().join("signed.txt");
    fs::write(&signed_path, signed.trim()).unwrap();
    let (stdout, _, success) = run_cvault(
        &config_path,
        &["verify-frame", signed_path.to_str().unwrap(), "--signer", "alice"],
    );
    assert!(success);
    assert!(stdout.contains("\"verified\": true"));

    fs::write(&signed_path, signed.trim().replacen("hello", "jello", 1)).unwrap();
    let (stdout, _, success) =
        run_cvault(&config_path, &["verify-frame", signed_path.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.contains("\"verified\": false"));
}

#[test]
fn test_sign_unknown_signer_fails() {
    let (tmp, config_path) = setup_test_env();
    let frame_path = tmp.path().join("frame.txt");
    fs::write(&frame_path, "[| hello]").unwrap();

    let (_, stderr, success) = run_cvault(
        &config_path,
        &["sign", frame_path.to_str().unwrap(), "--signer", "mallory"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown signer"));
}

#[test]
fn test_repair_audit_drops_torn_tail() {
    let (tmp, config_path) = setup_test_env();
    let (_, _, success) = run_cvault(&config_path, &["fact", "add", "fox", "is_a", "canine"]);
    assert!(success);

    let segment = tmp.path().join("vault").join("audit").join("000001.log");
    let mut log = fs::read_to_string(&segment).unwrap();
    log.push_str("[actor=tester event_id=#u1");
    fs::write(&segment, log).unwrap();

    let (stdout, _, success) = run_cvault(&config_path, &["verify"]);
    assert!(!success);
    assert!(stdout.contains("cvault repair-audit"), "verify output: {}", stdout);

    let (stdout, stderr, success) = run_cvault(&config_path, &["repair-audit"]);
    assert!(success, "repair failed: {}", stderr);
    assert!(stdout.contains("1 events remain"));

    let (stdout, _, success) = run_cvault(&config_path, &["verify"]);
    assert!(success, "verify after repair: {}", stdout);
    let (_, _, success) = run_cvault(&config_path, &["fact", "add", "cat", "is_a", "feline"]);
    assert!(success);
}
