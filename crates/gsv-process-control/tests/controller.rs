#![cfg(unix)]

use gsv_common::ProcessError;
use gsv_process_control::{
    ControllerState, LaunchSpec, ProcessController, ProcessExit, ProcessHandle, ProcessLauncher,
    SystemLauncher,
};
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("sh-test", "/bin/sh").args(["-c", script])
}

#[tokio::test]
async fn stdout_and_stderr_lines_are_delivered() {
    let controller = ProcessController::new("sh-test");
    let mut events = controller
        .start(&sh("echo first; echo second; echo oops 1>&2"))
        .unwrap();

    assert_eq!(events.output.recv().await.as_deref(), Some("first"));
    assert_eq!(events.output.recv().await.as_deref(), Some("second"));
    assert_eq!(events.errors.recv().await.as_deref(), Some("oops"));

    let exit = timeout(WAIT, events.exit).await.unwrap().unwrap();
    assert_eq!(exit, ProcessExit::Normal);
    assert_eq!(controller.state(), ControllerState::ExitedNormally);
    assert!(controller.has_exited());
}

#[tokio::test]
async fn started_reports_the_spawned_pid() {
    let controller = ProcessController::new("sh-test");
    let events = controller.start(&sh("sleep 0.1")).unwrap();

    let pid = timeout(WAIT, events.started).await.unwrap().unwrap();
    assert!(pid.is_some());
    assert_eq!(pid, controller.pid());

    timeout(WAIT, events.exit).await.unwrap().unwrap();
}

#[tokio::test]
async fn nonzero_exit_is_unexpected() {
    let controller = ProcessController::new("sh-test");
    let events = controller.start(&sh("exit 3")).unwrap();

    let exit = timeout(WAIT, events.exit).await.unwrap().unwrap();
    assert_eq!(
        exit,
        ProcessExit::Unexpected {
            code: Some(3),
            stop_requested: false
        }
    );
    assert_eq!(controller.state(), ControllerState::ExitedUnexpectedly);
}

#[tokio::test]
async fn send_writes_a_line_to_stdin() {
    let controller = ProcessController::new("sh-test");
    let mut events = controller
        .start(&sh("read line; echo got:$line"))
        .unwrap();

    controller.send("hello").await.unwrap();
    assert_eq!(
        timeout(WAIT, events.output.recv()).await.unwrap().as_deref(),
        Some("got:hello")
    );
    timeout(WAIT, events.exit).await.unwrap().unwrap();

    // Writing after exit is silently dropped
    controller.send("late").await.unwrap();
}

#[tokio::test]
async fn stop_command_lets_process_exit_on_its_own() {
    let controller = ProcessController::new("sh-test");
    let events = controller
        .start(&sh(r#"while read l; do if [ "$l" = quit ]; then exit 0; fi; done"#))
        .unwrap();

    controller
        .request_stop(Some("quit"), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(events.exit.await.unwrap(), ProcessExit::Normal);
}

#[tokio::test]
async fn stop_without_command_forces_termination() {
    let controller = ProcessController::new("sh-test");
    let events = controller.start(&sh("exec sleep 30")).unwrap();

    controller
        .request_stop(None, Duration::from_millis(200))
        .await
        .unwrap();

    let exit = events.exit.await.unwrap();
    assert_eq!(
        exit,
        ProcessExit::Unexpected {
            code: None,
            stop_requested: true
        }
    );
}

#[tokio::test]
async fn controller_cannot_be_started_twice() {
    let controller = ProcessController::new("sh-test");
    let events = controller.start(&sh("exit 0")).unwrap();

    let err = controller.start(&sh("exit 0")).unwrap_err();
    assert!(matches!(err, ProcessError::InvalidState { .. }));

    timeout(WAIT, events.exit).await.unwrap().unwrap();
}

#[tokio::test]
async fn dropping_controller_kills_child() {
    let controller = ProcessController::new("sh-test");
    let _events = controller.start(&sh("exec sleep 30")).unwrap();
    let pid = controller.pid().unwrap();

    drop(controller);

    let mut gone = false;
    for _ in 0..100 {
        if !gsv_process::process_exists(pid).unwrap_or(true) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "child {} survived controller drop", pid);
}

#[tokio::test]
async fn system_launcher_returns_fresh_handles() {
    let launcher = SystemLauncher::new();

    let first = launcher.launch(&sh("exit 0")).await.unwrap();
    let second = launcher.launch(&sh("exit 0")).await.unwrap();
    assert_ne!(first.handle.pid(), second.handle.pid());

    timeout(WAIT, first.events.exit).await.unwrap().unwrap();
    timeout(WAIT, second.events.exit).await.unwrap().unwrap();
    assert!(first.handle.wait_exit(Duration::from_millis(10)).await.is_some());
}

#[tokio::test]
async fn launching_missing_binary_fails() {
    let launcher = SystemLauncher::new();
    let result = launcher
        .launch(&LaunchSpec::new("missing", "/no/such/server-binary"))
        .await;
    assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
}
