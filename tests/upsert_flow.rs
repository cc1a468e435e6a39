mod common;

use common::{TestWorkspace, query_i64, query_text, row_count};
use encoding_rs::UTF_8;
use sql_loader::{
    config::LoaderConfig,
    db,
    ddl::TableMode,
    load::{self, LoadContext},
    recorder::JobStatus,
    relocate::NullRelocator,
    upsert::DuplicatePolicy,
};

fn upsert_config(ws: &TestWorkspace) -> LoaderConfig {
    let mut config = LoaderConfig::default();
    config.database.path = ws.db_path();
    config.loader.table_mode = TableMode::Upsert;
    config.upsert.key_columns = vec!["id".to_string()];
    config
}

#[test]
fn in_file_duplicates_collapse_to_the_last_occurrence() {
    let ws = TestWorkspace::new();
    let input = ws.write("users.csv", "id,name\n1,A\n1,B\n2,C\n");
    let config = upsert_config(&ws);
    let mut conn = db::open(&config.database).unwrap();
    let ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.recorder.ensure_tables(&conn).unwrap();

    let run = load::process_file(&mut conn, &ctx, &input, None).unwrap();
    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(run.rows_read, 3);
    assert_eq!(run.rows_inserted, 2);
    assert_eq!(row_count(&conn, "users"), 2);
    let name = query_text(&conn, "SELECT name FROM users WHERE id = 1");
    assert_eq!(name, "B", "last occurrence wins");
}

#[test]
fn first_wins_policy_keeps_the_earliest_occurrence() {
    let ws = TestWorkspace::new();
    let input = ws.write("users.csv", "id,name\n1,A\n1,B\n");
    let mut config = upsert_config(&ws);
    config.upsert.duplicate_policy = DuplicatePolicy::FirstWins;
    let mut conn = db::open(&config.database).unwrap();
    let ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.recorder.ensure_tables(&conn).unwrap();

    load::process_file(&mut conn, &ctx, &input, None).unwrap();
    let name = query_text(&conn, "SELECT name FROM users WHERE id = 1");
    assert_eq!(name, "A");
}

#[test]
fn reloading_the_same_file_is_idempotent() {
    let ws = TestWorkspace::new();
    let input = ws.write("users.csv", "id,name\n1,A\n2,B\n");
    let config = upsert_config(&ws);
    let mut conn = db::open(&config.database).unwrap();
    let ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.recorder.ensure_tables(&conn).unwrap();

    let first = load::process_file(&mut conn, &ctx, &input, None).unwrap();
    assert_eq!(first.rows_inserted, 2);
    assert_eq!(first.rows_updated, 0);

    let second = load::process_file(&mut conn, &ctx, &input, None).unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.rows_updated, 2);
    assert_eq!(row_count(&conn, "users"), 2, "no duplicate rows after a retry");
}

#[test]
fn changed_rows_update_in_place_and_new_rows_insert() {
    let ws = TestWorkspace::new();
    let original = ws.write("users.csv", "id,name\n1,A\n2,B\n");
    let config = upsert_config(&ws);
    let mut conn = db::open(&config.database).unwrap();
    let ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.recorder.ensure_tables(&conn).unwrap();
    load::process_file(&mut conn, &ctx, &original, None).unwrap();

    let revised = ws.write("users_v2.csv", "id,name\n2,Bee\n3,C\n");
    let mut ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.table_override = Some("users".to_string());
    let run = load::process_file(&mut conn, &ctx, &revised, None).unwrap();
    assert_eq!(run.rows_inserted, 1);
    assert_eq!(run.rows_updated, 1);
    assert_eq!(row_count(&conn, "users"), 3);
    assert_eq!(query_text(&conn, "SELECT name FROM users WHERE id = 2"), "Bee");
}

#[test]
fn rows_missing_a_key_value_are_rejected_not_fatal() {
    let ws = TestWorkspace::new();
    let input = ws.write("users.csv", "id,name\n1,A\n,B\n2,C\n");
    let config = upsert_config(&ws);
    let mut conn = db::open(&config.database).unwrap();
    let ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.recorder.ensure_tables(&conn).unwrap();

    let run = load::process_file(&mut conn, &ctx, &input, None).unwrap();
    assert_eq!(run.status, JobStatus::CompletedWithErrors);
    assert_eq!(run.rows_failed, 1);
    assert_eq!(row_count(&conn, "users"), 2);
    let category = query_text(&conn, "SELECT error_type FROM etl_job_errors");
    assert_eq!(category, "missing_key");
}

#[test]
fn upsert_without_key_columns_aborts_before_any_write() {
    let ws = TestWorkspace::new();
    let mut config = upsert_config(&ws);
    config.upsert.key_columns.clear();
    assert!(config.validate().is_err(), "validation catches it up front");
}

#[test]
fn job_statistics_count_updates_separately_from_inserts() {
    let ws = TestWorkspace::new();
    let input = ws.write("users.csv", "id,name\n1,A\n");
    let config = upsert_config(&ws);
    let mut conn = db::open(&config.database).unwrap();
    let ctx = LoadContext::new(&config, &NullRelocator, UTF_8);
    ctx.recorder.ensure_tables(&conn).unwrap();
    load::process_file(&mut conn, &ctx, &input, None).unwrap();
    load::process_file(&mut conn, &ctx, &input, None).unwrap();

    let updated = query_i64(
        &conn,
        "SELECT SUM(rows_updated) FROM etl_job_runs",
    );
    assert_eq!(updated, 1);
}
