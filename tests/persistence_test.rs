#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: load the roster
    let mut roster = tempfile::NamedTempFile::new().unwrap();
    writeln!(roster, "student_id,name,balance").unwrap();
    writeln!(roster, "S1,Ada,45").unwrap();

    let output1 = Command::new(cargo_bin!("stationhub"))
        .arg("--db-path")
        .arg(&db_path)
        .arg("import")
        .arg(roster.path())
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());

    // 2. Second run: an update to the same student against the same DB path
    let mut update = tempfile::NamedTempFile::new().unwrap();
    writeln!(update, "student_id,balance").unwrap();
    writeln!(update, "S1,0").unwrap();

    let output2 = Command::new(cargo_bin!("stationhub"))
        .arg("--db-path")
        .arg(&db_path)
        .arg("import")
        .arg(update.path())
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let report = String::from_utf8_lossy(&output2.stdout);
    assert!(report.contains("\"updated\": 1"));

    // 3. Third run: the roster and the log reflect both runs
    let roster_out = Command::new(cargo_bin!("stationhub"))
        .arg("--db-path")
        .arg(&db_path)
        .arg("roster")
        .output()
        .expect("Failed to execute command");
    let roster_csv = String::from_utf8_lossy(&roster_out.stdout);
    assert!(roster_csv.contains("S1,Ada,0.00,PAID"));

    let logs_out = Command::new(cargo_bin!("stationhub"))
        .arg("--db-path")
        .arg(&db_path)
        .arg("logs")
        .output()
        .expect("Failed to execute command");
    let logs = String::from_utf8_lossy(&logs_out.stdout);
    assert_eq!(logs.lines().count(), 2);
    assert!(logs.lines().all(|line| line.contains("roster_imported")));
}
