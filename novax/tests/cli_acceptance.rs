use novax_core::{Database, Score, SessionLedger, SessionStatus};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("novax/ledger.db")
    }

    fn open_db(&self) -> Database {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db
    }

    fn write_config(&self, body: &str) {
        let dir = self.xdg_config.join("novax");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), body).expect("failed to write config");
    }
}

fn run_admin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("novax-admin"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute novax-admin: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "novax-admin {} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        stdout,
        stderr
    );
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

/// One completed session worth 9 x 50 exp and one in-progress session.
fn seed_sessions(db: &Database) -> (i64, i64) {
    let done = db
        .create_session(7, 3, chrono::Utc::now())
        .expect("create completed session");
    let scores: Vec<Score> = novax_core::config::DEFAULT_DIMENSIONS
        .iter()
        .map(|d| Score::new(*d, 50))
        .collect();
    db.insert_score_points(done.id, &scores)
        .expect("insert score points");
    assert!(db
        .mark_completed(done.id, chrono::Utc::now(), None)
        .expect("mark completed"));

    let live = db
        .create_session(7, 4, chrono::Utc::now())
        .expect("create live session");
    (done.id, live.id)
}

#[test]
fn levels_prints_default_schedule() {
    let env = CliTestEnv::new();

    let args = ["levels", "--count", "3"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("base 500, step 300"), "got:\n{stdout}");

    let args = ["--format", "json", "levels", "--count", "3"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let json = stdout_json(&output);
    let levels = json["levels"].as_array().expect("levels array");
    assert_eq!(levels.len(), 3);
    assert_eq!(levels[0]["exp_to_reach"], 0);
    assert_eq!(levels[1]["exp_to_reach"], 500);
    assert_eq!(levels[2]["exp_to_reach"], 1300);
}

#[test]
fn levels_follow_configured_constants() {
    let env = CliTestEnv::new();
    env.write_config("[leveling]\nbase_exp = 100\nstep_exp = 50\n");

    let args = ["--format", "json", "levels", "--count", "3"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let json = stdout_json(&output);
    assert_eq!(json["levels"][2]["exp_to_reach"], 250);
}

#[test]
fn invalid_config_is_rejected() {
    let env = CliTestEnv::new();
    env.write_config("[leveling]\nbase_exp = 0\n");

    let output = run_admin(&env, &["levels"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("base_exp"), "got:\n{stderr}");
}

#[test]
fn dashboard_on_empty_ledger() {
    let env = CliTestEnv::new();

    let args = ["dashboard", "--user", "7"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Level:       1"), "got:\n{stdout}");
    assert!(stdout.contains("No completed sessions yet."));
    assert!(env.db_path().exists());
}

#[test]
fn dashboard_and_history_report_completed_sessions() {
    let env = CliTestEnv::new();
    let (done, _) = seed_sessions(&env.open_db());

    let args = ["--format", "json", "dashboard", "--user", "7"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let json = stdout_json(&output);
    assert_eq!(json["progress"]["total_exp"], 450);
    assert_eq!(json["progress"]["level"], 1);
    assert_eq!(json["by_dimension"]["Clarity"], 50);

    let args = ["--format", "json", "history", "--user", "7"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let json = stdout_json(&output);
    let sessions = json.as_array().expect("history array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], done);
    assert_eq!(sessions[0]["total_exp"], 450);
}

#[test]
fn cleanup_and_abandon_only_touch_in_progress_sessions() {
    let env = CliTestEnv::new();
    let (done, live) = seed_sessions(&env.open_db());

    let abandon_done = done.to_string();
    let args = ["abandon", "--session", abandon_done.as_str()];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("COMPLETED and was kept"));

    let args = ["--format", "json", "cleanup", "--user", "7"];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    assert_eq!(stdout_json(&output)["evicted"], 1);

    let db = env.open_db();
    assert!(db.get_session(live).unwrap().is_none());
    assert_eq!(
        db.get_session(done).unwrap().map(|s| s.status),
        Some(SessionStatus::Completed)
    );

    // Abandoning something that no longer exists is a quiet success
    let gone = live.to_string();
    let args = ["abandon", "--session", gone.as_str()];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("nothing to do"));
}

#[test]
fn status_reports_ledger_state() {
    let env = CliTestEnv::new();
    let (_, live) = seed_sessions(&env.open_db());

    let session = live.to_string();
    let args = ["--format", "json", "status", "--session", session.as_str()];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);
    let json = stdout_json(&output);
    assert_eq!(json["status"], "IN_PROGRESS");
    assert_eq!(json["buffered"], false);
    assert!(json["summary"].is_null());
}

#[test]
fn assess_without_llm_config_fails_cleanly() {
    let env = CliTestEnv::new();
    let transcript = env.home.join("transcript.txt");
    fs::write(&transcript, "user: Explain recursion\nassistant: What is a base case?\n")
        .expect("failed to write transcript");

    let path = transcript.to_string_lossy().into_owned();
    let output = run_admin(&env, &["assess", "--file", path.as_str()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[llm]"), "got:\n{stderr}");
}
