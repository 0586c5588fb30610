#![allow(unused_crate_dependencies)]
//! Socket and supervisor verbs against real supervisor runs

mod common;

use std::path::Path;
use std::time::Duration;

use cli::{execute, Client, Commands};
use common::run_with_timeout;
use daemon::Bootstrap;
use schema::{Message, ProcessState, RunMode, SupervisorSpec, SupervisorState, TimerMode};

fn spec_in(dir: &Path, script: &str) -> SupervisorSpec {
    let mut spec = SupervisorSpec::for_command("/bin/sh", vec!["-c".into(), script.into()]);
    spec.name = "cli-test".to_string();
    spec.timing.timer_mode = TimerMode::WallClock;
    spec.paths.pid_file = Some(dir.join("warden.pid").to_string_lossy().into_owned());
    spec.paths.control_socket = Some(dir.join("warden.sock").to_string_lossy().into_owned());
    spec.paths.dump_directory = Some(dir.to_string_lossy().into_owned());
    spec
}

#[tokio::test]
async fn test_socket_verbs_reach_running_supervisor() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(tmp.path(), "sleep 30");
    let config = tmp.path().join("warden.toml");
    let socket = spec.paths.control_socket.clone().unwrap();

    let run = tokio::spawn(
        Bootstrap::new(spec.clone(), RunMode::Console)
            .without_process_hooks()
            .run(),
    );

    run_with_timeout(Duration::from_secs(45), async {
        let client = Client::new(&socket);
        loop {
            if let Ok(status) = client.fetch_status().await {
                if status.process_state == ProcessState::Up {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(execute(Commands::Status, &spec, &config, &[]).await.unwrap(), 0);
        assert_eq!(
            execute(Commands::Control { code: 200 }, &spec, &config, &[])
                .await
                .unwrap(),
            0
        );
        assert_eq!(execute(Commands::Pause, &spec, &config, &[]).await.unwrap(), 0);
        loop {
            let status = client.fetch_status().await.unwrap();
            if status.supervisor_state == SupervisorState::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        client.command(Message::Stop).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_socket_verb_without_supervisor_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(tmp.path(), "true");
    let config = tmp.path().join("warden.toml");

    let err = execute(Commands::Status, &spec, &config, &[]).await.unwrap_err();
    assert_eq!(err.code(), "IPC001");

    let mut spec = spec;
    spec.paths.control_socket = None;
    let err = execute(Commands::Dump, &spec, &config, &[]).await.unwrap_err();
    assert_eq!(err.code(), "CLI002");
    assert!(err.to_string().contains("controlSocket"));
}

#[tokio::test]
async fn test_console_returns_application_exit_code() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut spec = spec_in(tmp.path(), "exit 4");
    spec.paths.control_socket = None;
    spec.exit_policy.codes.push(schema::ExitCodeOverride {
        code: 4,
        action: schema::RestartDecision::Stop,
    });
    let config = tmp.path().join("warden.toml");

    let code = run_with_timeout(
        Duration::from_secs(45),
        execute(Commands::Console, &spec, &config, &[]),
    )
    .await
    .unwrap();
    assert_eq!(code, 4);
    assert!(!tmp.path().join("warden.pid").exists());
}
