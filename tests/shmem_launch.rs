use assert_cmd::Command;
use serial_test::serial;

fn report_lines(stdout: &[u8], num_pes: usize) -> usize {
    let prefix = format!("Aggregated ELAPSED_MS across {} PEs:", num_pes);
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| l.starts_with(&prefix))
        .count()
}

#[test]
#[serial]
fn standalone_single_pe() {
    let assert = Command::cargo_bin("global_done")
        .unwrap()
        .env("GLOBAL_DONE_BACKEND", "local")
        .assert()
        .success();
    assert_eq!(report_lines(&assert.get_output().stdout, 1), 1);
}

#[test]
#[serial]
fn shmem_job_prints_one_report() {
    for &num_pes in &[1usize, 4, 7] {
        let program = assert_cmd::cargo::cargo_bin("global_done");
        let assert = Command::cargo_bin("gd_run")
            .unwrap()
            .arg(num_pes.to_string())
            .arg(program)
            .env("GLOBAL_DONE_GROUP_SIZE", "2")
            .env("GLOBAL_DONE_WORK_MS", "20")
            .env("GLOBAL_DONE_PAUSE_US", "100")
            .assert()
            .success();
        assert_eq!(report_lines(&assert.get_output().stdout, num_pes), 1);
    }
}

#[test]
#[serial]
fn launcher_rejects_bad_arguments() {
    Command::cargo_bin("gd_run").unwrap().assert().failure();
    Command::cargo_bin("gd_run")
        .unwrap()
        .args(["0", "true"])
        .assert()
        .failure();
}

#[test]
#[serial]
fn shmem_star_strategies_clear_once() {
    for strategy in ["star", "hstar", "static_tree"] {
        let program = assert_cmd::cargo::cargo_bin("global_done");
        let assert = Command::cargo_bin("gd_run")
            .unwrap()
            .arg("5")
            .arg(program)
            .env("GLOBAL_DONE_STRATEGY", strategy)
            .env("GLOBAL_DONE_GROUP_SIZE", "2")
            .env("GLOBAL_DONE_BRANCH_K", "2")
            .env("GLOBAL_DONE_WORK_MS", "20")
            .env("GLOBAL_DONE_PAUSE_US", "100")
            .assert()
            .success();
        let stdout = &assert.get_output().stdout;
        assert_eq!(report_lines(stdout, 5), 1);
        let all_clear = String::from_utf8_lossy(stdout)
            .lines()
            .filter(|l| l.starts_with("ALL_CLEAR"))
            .count();
        assert_eq!(all_clear, if strategy == "static_tree" { 0 } else { 1 });
    }
}
