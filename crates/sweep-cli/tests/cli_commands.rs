use std::path::PathBuf;
use std::process::Command;

use sweep_exp::{CumulativeTable, ResultRow};

fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join(relative)
}

fn sweep_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sweep"))
}

#[test]
fn generate_writes_one_descriptor_per_combination() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let output = sweep_bin()
        .arg("generate")
        .arg("--config")
        .arg(fixture_path("sweep/smoke.yaml"))
        .arg("--template")
        .arg(fixture_path("sweep/template.yaml"))
        .arg("--out")
        .arg(temp.path())
        .output()
        .expect("run sweep generate");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let tasks = sweep_exp::list_tasks(&temp.path().join("tasks")).expect("list");
    assert_eq!(tasks, vec!["task_0", "task_1"]);
}

#[test]
fn invalid_config_exits_non_zero() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = temp.path().join("bad.yaml");
    std::fs::write(&config, "parameters: {gain: []}\ninput_map: {k: gain}\n").expect("write");
    let output = sweep_bin()
        .arg("generate")
        .arg("--config")
        .arg(&config)
        .arg("--template")
        .arg(fixture_path("sweep/template.yaml"))
        .arg("--out")
        .arg(temp.path().join("out"))
        .output()
        .expect("run sweep generate");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parameter_empty"));
}

#[test]
fn table_reports_best_feasible_row_and_exports_csv() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let results = temp.path().join("results.json");
    let mut table = CumulativeTable::new();
    table.insert(ResultRow::new("task_0").with("cost", 0.2).with("constraint", 1.0));
    table.insert(ResultRow::new("task_1").with("cost", 0.5).with("constraint", 0.0));
    table.insert(ResultRow::new("task_2").with("cost", 0.9));
    table.save(&results).expect("save");

    let csv = temp.path().join("results.csv");
    let output = sweep_bin()
        .arg("table")
        .arg("--results")
        .arg(&results)
        .arg("--csv")
        .arg(&csv)
        .output()
        .expect("run sweep table");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("summary json");
    assert_eq!(summary["rows"], 3);
    assert_eq!(summary["best"]["task"], "task_1");
    assert!(csv.is_file());
}

#[cfg(unix)]
#[test]
fn run_executes_simulator_command_and_resumes() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let out = temp.path().join("out");
    let script = r#"echo '{"err": 0.1, "speed": 1.0}' > "$2/results/kpis.json""#;
    let run = || {
        sweep_bin()
            .arg("run")
            .arg("--config")
            .arg(fixture_path("sweep/smoke.yaml"))
            .arg("--template")
            .arg(fixture_path("sweep/template.yaml"))
            .arg("--out")
            .arg(&out)
            .arg("--workers")
            .arg("2")
            .arg("--")
            .args(["sh", "-c", script, "simulator"])
            .output()
            .expect("run sweep run")
    };

    let first = run();
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    let table = CumulativeTable::load(&out.join("results.json")).expect("table");
    assert_eq!(table.len(), 2);
    assert!(out.join("sweep_report.json").is_file());
    assert!(out.join("results.csv").is_file());

    let second = run();
    assert!(second.status.success());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("0 tasks recorded, 2 already present"), "{stdout}");
}

#[cfg(unix)]
#[test]
fn interrupt_lets_running_simulations_finish_their_batch() {
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let temp = tempfile::tempdir().expect("tmp dir");
    let out = temp.path().join("out");
    let script = concat!(
        r#"touch "$2/started"; sleep 1; "#,
        r#"echo '{"err": 0.1, "speed": 1.0}' > "$2/results/kpis.json""#
    );
    // Own group, like a foreground job: the interrupt goes to the whole group.
    let child = sweep_bin()
        .arg("run")
        .arg("--config")
        .arg(fixture_path("sweep/smoke.yaml"))
        .arg("--template")
        .arg(fixture_path("sweep/template.yaml"))
        .arg("--out")
        .arg(&out)
        .arg("--workers")
        .arg("1")
        .arg("--")
        .args(["sh", "-c", script, "simulator"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .expect("spawn sweep run");

    let marker = out.join("runs").join("task_0").join("started");
    let deadline = Instant::now() + Duration::from_secs(20);
    while !marker.exists() {
        assert!(Instant::now() < deadline, "simulator never started");
        std::thread::sleep(Duration::from_millis(20));
    }
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -INT -{}", child.id()))
        .status()
        .expect("send interrupt");
    assert!(status.success());

    let output = child.wait_with_output().expect("wait sweep run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sweep stopped early"), "{stdout}");
    assert!(stdout.contains("2 tasks recorded"), "{stdout}");
    let table = CumulativeTable::load(&out.join("results.json")).expect("table");
    assert_eq!(table.len(), 2);
    assert!(out.join("STOP").is_file());
}
