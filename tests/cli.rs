mod common;

use assert_cmd::Command;
use common::{TestWorkspace, query_i64, row_count};
use predicates::{prelude::PredicateBooleanExt, str::contains};

fn loader() -> Command {
    Command::cargo_bin("sql-loader").expect("binary exists")
}

#[test]
fn load_command_creates_the_table_end_to_end() {
    let ws = TestWorkspace::new();
    let input = ws.write("orders.csv", "id,total\n1,10.50\n2,20.25\n");
    loader()
        .args([
            "load",
            "-i",
            input.to_str().unwrap(),
            "--db",
            ws.db_path().to_str().unwrap(),
        ])
        .assert()
        .success();

    let conn = ws.open_db();
    assert_eq!(row_count(&conn, "orders"), 2);
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM etl_job_runs"), 1);
    // Relocation is on by default.
    assert!(ws.path().join("processed").join("orders.csv").exists());
}

#[test]
fn failed_load_exits_nonzero_and_quarantines() {
    let ws = TestWorkspace::new();
    let input = ws.write("bad.csv", "id,v\n1,a\n2,b,extra\n");
    loader()
        .args([
            "load",
            "-i",
            input.to_str().unwrap(),
            "--db",
            ws.db_path().to_str().unwrap(),
            "--transaction-mode",
            "strict",
        ])
        .assert()
        .failure()
        .stderr(contains("failed"));
    assert!(ws.path().join("error").join("bad.csv").exists());
}

#[test]
fn probe_prints_create_table_without_writing() {
    let ws = TestWorkspace::new();
    let input = ws.write("orders.csv", "id,placed_at\n1,2024-01-05\n");
    loader()
        .args(["probe", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("CREATE TABLE \"orders\"").and(contains("\"placed_at\" TIMESTAMP")));
    assert!(!ws.db_path().exists(), "probe never touches the store");
}

#[test]
fn batch_command_loads_a_directory() {
    let ws = TestWorkspace::new();
    let inbox = ws.path().join("inbox");
    std::fs::create_dir(&inbox).unwrap();
    std::fs::write(inbox.join("a.csv"), "id,v\n1,x\n").unwrap();
    std::fs::write(inbox.join("b.csv"), "id,v\n2,y\n").unwrap();

    loader()
        .args([
            "batch",
            "-d",
            inbox.to_str().unwrap(),
            "--db",
            ws.db_path().to_str().unwrap(),
        ])
        .assert()
        .success();

    let conn = ws.open_db();
    assert_eq!(row_count(&conn, "a"), 1);
    assert_eq!(row_count(&conn, "b"), 1);
    assert_eq!(query_i64(&conn, "SELECT total_files FROM etl_batch_jobs"), 2);
}

#[test]
fn unknown_encoding_is_rejected_up_front() {
    let ws = TestWorkspace::new();
    let input = ws.write("a.csv", "id\n1\n");
    loader()
        .args([
            "load",
            "-i",
            input.to_str().unwrap(),
            "--db",
            ws.db_path().to_str().unwrap(),
            "--input-encoding",
            "no-such-charset",
        ])
        .assert()
        .failure()
        .stderr(contains("unknown encoding"));
}
