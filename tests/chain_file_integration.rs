#![cfg(unix)]

use serial_test::serial;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use taskchain::cli::FileChain;
use taskchain::{Engine, EngineConfig, ProgressMonitor, Severity, Status, TaskingError};
use tempfile::TempDir;

fn engine() -> Engine {
    Engine::builder(EngineConfig::default())
        .without_estimation()
        .build()
        .expect("Should be able to build engine")
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Should be able to create directory");
    }
    fs::write(&path, content).expect("Should be able to write chain file");
    path
}

async fn run_file(path: &Path) -> Status {
    let chain = FileChain::load(path).expect("Should be able to load chain file");
    engine()
        .run(chain.into_arc())
        .await
        .expect("Chain should run")
}

#[tokio::test]
#[serial]
async fn test_commands_run_in_order() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "build.toml",
        r#"
        name = "Build"

        [[tasks]]
        name = "first"
        command = "sh"
        args = ["-c", "echo one >> log.txt"]

        [[tasks]]
        name = "second"
        command = "sh"
        args = ["-c", "echo two >> log.txt"]
        "#,
    );

    let status = run_file(&chain).await;

    assert_eq!(status.severity(), Severity::Ok);
    assert_eq!(status.children().len(), 2);
    let log = fs::read_to_string(dir.path().join("log.txt")).unwrap();
    assert_eq!(log, "one\ntwo\n");
}

#[tokio::test]
#[serial]
async fn test_failing_command_halts_chain() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "fail.toml",
        r#"
        name = "Failing"

        [[tasks]]
        name = "broken"
        command = "sh"
        args = ["-c", "exit 3"]

        [[tasks]]
        command = "touch"
        args = ["never"]
        "#,
    );

    let status = run_file(&chain).await;

    assert_eq!(status.severity(), Severity::Error);
    assert_eq!(status.children().len(), 1);
    assert_eq!(status.children()[0].message(), "broken exited with 3");
    assert!(!dir.path().join("never").exists());
}

#[tokio::test]
#[serial]
async fn test_allowed_failure_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "lenient.toml",
        r#"
        name = "Lenient"

        [[tasks]]
        command = "false"
        allow_failure = true

        [[tasks]]
        command = "touch"
        args = ["reached"]
        "#,
    );

    let status = run_file(&chain).await;

    assert_eq!(status.severity(), Severity::Warning);
    assert!(dir.path().join("reached").exists());
}

#[tokio::test]
#[serial]
async fn test_retry_recovers_flaky_command() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "flaky.toml",
        r#"
        name = "Flaky"
        retries = 2

        [[tasks]]
        name = "flaky"
        command = "sh"
        args = ["-c", "if [ -f marker ]; then exit 0; fi; touch marker; exit 1"]
        "#,
    );

    let status = run_file(&chain).await;

    assert!(!status.is_halting());
    assert!(dir.path().join("marker").exists());
}

#[tokio::test]
#[serial]
async fn test_barrier_waits_for_background_command() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "parallel.toml",
        r#"
        name = "Parallel"

        [[tasks]]
        name = "slow"
        command = "sh"
        args = ["-c", "sleep 0.3; echo done > slow.txt"]
        background = true

        [[tasks]]
        barrier = true

        [[tasks]]
        name = "check"
        command = "test"
        args = ["-f", "slow.txt"]
        "#,
    );

    let status = run_file(&chain).await;

    assert_eq!(status.severity(), Severity::Ok, "{}", status.to_tree_string());
    assert_eq!(status.children().len(), 3);
}

#[tokio::test]
#[serial]
async fn test_unawaited_background_command_is_joined() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "trailing.toml",
        r#"
        name = "Trailing"

        [[tasks]]
        command = "sh"
        args = ["-c", "sleep 0.2; touch late"]
        background = true
        "#,
    );

    let status = run_file(&chain).await;

    assert_eq!(status.severity(), Severity::Ok);
    assert_eq!(status.children().len(), 2);
    assert!(dir.path().join("late").exists());
}

#[tokio::test]
#[serial]
async fn test_included_chain_runs_relative_to_its_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "checks/checks.toml",
        r#"
        name = "Checks"

        [[tasks]]
        command = "touch"
        args = ["checked"]
        "#,
    );
    let chain = write(
        dir.path(),
        "main.toml",
        r#"
        name = "Main"

        [[tasks]]
        include = "checks/checks.toml"

        [[tasks]]
        command = "touch"
        args = ["main"]
        "#,
    );

    let loaded = FileChain::load(&chain).unwrap();
    let ctx = engine().create_context(loaded.into_arc()).unwrap();
    assert_eq!(ctx.tasks().len(), 2);

    let status = run_file(&chain).await;
    assert!(status.is_ok());
    assert!(dir.path().join("checks/checked").exists());
    assert!(dir.path().join("main").exists());
}

#[tokio::test]
#[serial]
async fn test_lazy_chain_is_read_when_reached() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "generate.toml",
        r#"
        name = "Generate"

        [[tasks]]
        name = "generate"
        command = "sh"
        args = ["-c", "printf 'name = \"Generated\"\n[[tasks]]\ncommand = \"touch\"\nargs = [\"generated\"]\n' > generated.toml"]

        [[tasks]]
        lazy = "generated.toml"
        "#,
    );

    let status = run_file(&chain).await;

    assert!(status.is_ok(), "{}", status.to_tree_string());
    assert!(dir.path().join("generated").exists());
}

#[test]
fn test_include_cycle_fails_context_creation() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.toml", "name = \"A\"\n[[tasks]]\ninclude = \"b.toml\"\n");
    let chain = write(dir.path(), "b.toml", "name = \"B\"\n[[tasks]]\ninclude = \"a.toml\"\n");

    let loaded = FileChain::load(&chain).unwrap();
    let err = engine().create_context(loaded.into_arc()).unwrap_err();
    assert!(matches!(err, TaskingError::ChainInit { .. }));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("include each other"));
}

#[tokio::test]
#[serial]
async fn test_cancellation_kills_running_command() {
    let dir = TempDir::new().unwrap();
    let chain = write(
        dir.path(),
        "long.toml",
        r#"
        name = "Long"
        retries = 3

        [[tasks]]
        name = "sleeper"
        command = "sleep"
        args = ["10"]
        "#,
    );

    let engine = engine();
    let loaded = FileChain::load(&chain).unwrap();
    let mut ctx = engine.create_context(loaded.into_arc()).unwrap();
    let monitor = ProgressMonitor::new("long");
    let cancel = monitor.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let status = engine.run_task_chain(&mut ctx, &monitor).await.unwrap();

    assert_eq!(status.severity(), Severity::Cancel);
    assert!(started.elapsed() < Duration::from_secs(5));
}
