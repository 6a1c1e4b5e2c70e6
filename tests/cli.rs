//! Command-line tests for the sfrgrid binary.
//!
//! Covers:
//! 1. BUILD: reach table to stdout and to a file, segment table, stats
//! 2. BUILD --strict with excluded components
//! 3. CHECK: clean network and routing cycles
//! 4. Error handling for malformed input

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::{NamedTempFile, TempDir};

// =============================================================================
// Helper functions
// =============================================================================

fn create_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file.flush().unwrap();
    file
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn run_sfrgrid(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sfrgrid"))
        .args(args)
        .output()
        .expect("Failed to run sfrgrid")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

const GRID: &str = r#"{ "nrow": 2, "ncol": 3, "delr": [10.0], "delc": [10.0] }"#;

const FLOWLINES: &str = "id\ttoid\tgeometry\televup\televdn\n\
    1\t2\tLINESTRING (5 15, 5 5)\t12\t10\n\
    2\t0\tLINESTRING (5 5, 25 5)\t10\t6\n";

const CYCLE: &str = "id\ttoid\tgeometry\televup\televdn\n\
    1\t2\tLINESTRING (1 15, 9 15)\t5\t4\n\
    2\t1\tLINESTRING (11 15, 19 15)\t4\t3\n\
    3\t0\tLINESTRING (1 5, 29 5)\t9\t2\n";

// =============================================================================
// BUILD
// =============================================================================

#[test]
fn test_build_to_stdout() {
    let grid = create_file(GRID);
    let flowlines = create_file(FLOWLINES);

    let output = run_sfrgrid(&[
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("rno\tiseg\tireach"));
    assert_eq!(lines.len(), 6);
    // Last reach drains out of the model.
    assert!(lines[5].starts_with("5\t2\t3\t2\t"));
    assert!(lines[5].ends_with("\t0"));
}

#[test]
fn test_build_to_files_with_stats() {
    let grid = create_file(GRID);
    let flowlines = create_file(FLOWLINES);
    let dir = TempDir::new().unwrap();
    let reaches = dir.path().join("reaches.tsv");
    let segments = dir.path().join("segments.tsv");

    let output = run_sfrgrid(&[
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
        "-o",
        path_str(&reaches),
        "--segments",
        path_str(&segments),
        "--stats",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("Build stats:"));

    let reach_table = std::fs::read_to_string(&reaches).unwrap();
    assert_eq!(reach_table.lines().count(), 6);

    let segment_table = std::fs::read_to_string(&segments).unwrap();
    let rows: Vec<&str> = segment_table.lines().collect();
    assert_eq!(rows[0], "nseg\toutseg\tsegment_id\tnreach\tfirst_reach");
    assert_eq!(rows[1], "1\t2\t1\t2\t1");
    assert_eq!(rows[2], "2\t0\t2\t3\t3");
}

#[test]
fn test_build_strict_fails_on_cycle() {
    let grid = create_file(r#"{ "nrow": 2, "ncol": 3, "delr": [10.0], "delc": [10.0] }"#);
    let flowlines = create_file(CYCLE);
    let args = [
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
        "--report",
    ];

    let relaxed = run_sfrgrid(&args);
    assert!(relaxed.status.success());
    assert!(stderr(&relaxed).contains("routing_cycle"));

    let mut strict_args = args.to_vec();
    strict_args.push("--strict");
    let strict = run_sfrgrid(&strict_args);
    assert_eq!(strict.status.code(), Some(2));
    // Segment 3 is still written.
    assert_eq!(stdout(&strict).lines().count(), 4);
}

#[test]
fn test_build_with_config() {
    let grid = create_file(GRID);
    let flowlines = create_file(FLOWLINES);
    let config = create_file(r#"{ "model_units": "feet", "elevation": { "auto_correct": true } }"#);

    let output = run_sfrgrid(&[
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
        "-c",
        path_str(config.path()),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    let first: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
    let rchlen: f64 = first[8].parse().unwrap();
    assert!((rchlen - 5.0 / 0.3048).abs() < 1e-9);
}

#[test]
fn test_build_writes_lowered_bottoms() {
    let grid = create_file(
        r#"{ "nrow": 1, "ncol": 2, "delr": [10.0], "delc": [10.0],
            "top": [100, 100], "botm": [[95, 95], [80, 80]] }"#,
    );
    let flowlines = create_file(
        "id\ttoid\tgeometry\televup\televdn\n\
        1\t0\tLINESTRING (0 5, 20 5)\t98\t70\n",
    );
    let config = create_file(
        r#"{ "layers": { "streambed_thickness": 1.0, "buffer": 0.0, "lower_model_bottom": true } }"#,
    );
    let dir = TempDir::new().unwrap();
    let bottoms = dir.path().join("bottoms.tsv");

    let output = run_sfrgrid(&[
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
        "-c",
        path_str(config.path()),
        "--bottoms",
        path_str(&bottoms),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let table = std::fs::read_to_string(&bottoms).unwrap();
    assert_eq!(table, "node\tbotm\n1\t76.0\n");
}

// =============================================================================
// CHECK
// =============================================================================

#[test]
fn test_check_clean_network() {
    let flowlines = create_file(FLOWLINES);
    let output = run_sfrgrid(&["check", "-f", path_str(flowlines.path())]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("2 segments, 1 outlets, 0 cycles, 0 orphan references"));
}

#[test]
fn test_check_reports_cycle() {
    let flowlines = create_file(CYCLE);
    let output = run_sfrgrid(&["check", "-f", path_str(flowlines.path())]);
    assert_eq!(output.status.code(), Some(2));
    let text = stdout(&output);
    assert!(text.contains("1 cycles"));
    assert!(text.contains("routing_cycle"));
}

// =============================================================================
// Error handling
// =============================================================================

#[test]
fn test_missing_geometry_column() {
    let grid = create_file(GRID);
    let flowlines = create_file("id\ttoid\n1\t0\n");
    let output = run_sfrgrid(&[
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error:"));
}

#[test]
fn test_invalid_grid() {
    let grid = create_file(r#"{ "nrow": 2, "ncol": 3, "delr": [10.0, 5.0], "delc": [10.0] }"#);
    let flowlines = create_file(FLOWLINES);
    let output = run_sfrgrid(&[
        "build",
        "-f",
        path_str(flowlines.path()),
        "-g",
        path_str(grid.path()),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error:"));
}

#[test]
fn test_missing_file() {
    let output = run_sfrgrid(&["check", "-f", "/nonexistent/flowlines.tsv"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error:"));
}
