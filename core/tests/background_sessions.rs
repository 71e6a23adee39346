//! End-to-end background session tests: real children, real PTYs.

#![cfg(unix)]

use std::time::Duration;
use std::time::Instant;

use loaf_core::background::BackgroundSessionManager;
use loaf_core::background::ReadSessionParams;
use loaf_core::background::ResizeSessionParams;
use loaf_core::background::SessionId;
use loaf_core::background::SessionStatus;
use loaf_core::background::StartSessionParams;
use loaf_core::background::StopSessionParams;
use loaf_core::background::StreamSelector;
use loaf_core::background::TransportKind;
use loaf_core::background::WriteSessionParams;
use loaf_core::LoafErr;

fn start_params(command: &str, full_terminal: bool) -> StartSessionParams {
    serde_json::from_value(serde_json::json!({
        "command": command,
        "full_terminal": full_terminal,
    }))
    .unwrap()
}

fn read_params(session_id: SessionId) -> ReadSessionParams {
    serde_json::from_value(serde_json::json!({ "session_id": session_id.0 })).unwrap()
}

/// Polls the session until `predicate` matches the accumulated stdout.
async fn wait_for_output(
    manager: &BackgroundSessionManager,
    session_id: SessionId,
    predicate: impl Fn(&str) -> bool,
) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = String::new();
    while Instant::now() < deadline {
        let response = manager.read(read_params(session_id)).await.unwrap();
        if let Some(slice) = response.stdout {
            seen.push_str(&slice.text);
        }
        if predicate(&seen) {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for session output; saw: {seen:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pty_session_receives_typed_input_and_enter_key() {
    let manager = BackgroundSessionManager::new();
    let start = manager
        .start(start_params("read line; echo \"value:$line\"", true))
        .await
        .unwrap();
    assert_eq!(start.transport, TransportKind::Pty);
    assert_eq!(start.cols, 120);
    assert_eq!(start.rows, 36);

    manager
        .write(WriteSessionParams {
            session_id: start.session_id,
            input: Some("loaf-pty".to_string()),
            append_newline: false,
            key: None,
            repeat: 1,
        })
        .await
        .unwrap();
    manager
        .write(WriteSessionParams {
            session_id: start.session_id,
            input: None,
            append_newline: true,
            key: Some("enter".to_string()),
            repeat: 1,
        })
        .await
        .unwrap();

    let output = wait_for_output(&manager, start.session_id, |seen| {
        seen.contains("value:loaf-pty")
    })
    .await;
    assert!(output.contains("value:loaf-pty"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipe_session_keeps_streams_separate() {
    let manager = BackgroundSessionManager::new();
    let start = manager
        .start(start_params("echo to-stdout; echo to-stderr 1>&2", false))
        .await
        .unwrap();
    assert_eq!(start.transport, TransportKind::Pipe);

    let deadline = Instant::now() + Duration::from_secs(10);
    let (mut out, mut err) = (String::new(), String::new());
    while Instant::now() < deadline {
        let response = manager.read(read_params(start.session_id)).await.unwrap();
        if let Some(slice) = response.stdout {
            out.push_str(&slice.text);
        }
        if let Some(slice) = response.stderr {
            err.push_str(&slice.text);
        }
        if out.contains("to-stdout") && err.contains("to-stderr") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(out.contains("to-stdout"));
    assert!(!out.contains("to-stderr"));
    assert!(err.contains("to-stderr"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequential_reads_reassemble_child_output() {
    let manager = BackgroundSessionManager::new();
    let start = manager
        .start(start_params("for i in $(seq 1 200); do echo line-$i; done", false))
        .await
        .unwrap();

    // Wait for the child to finish, then drain in small slices.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let response = manager
            .read(ReadSessionParams {
                session_id: start.session_id,
                stream: StreamSelector::Stdout,
                max_chars: 1,
                peek: true,
            })
            .await
            .unwrap();
        if response.status == SessionStatus::Exited {
            break;
        }
        assert!(Instant::now() < deadline, "child did not exit in time");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut collected = String::new();
    loop {
        let response = manager
            .read(ReadSessionParams {
                session_id: start.session_id,
                stream: StreamSelector::Stdout,
                max_chars: 700,
                peek: false,
            })
            .await
            .unwrap();
        let slice = response.stdout.unwrap();
        assert!(!slice.dropped);
        collected.push_str(&slice.text);
        if !slice.has_more && slice.unread == 0 {
            break;
        }
    }

    let expected: String = (1..=200).map(|i| format!("line-{i}\n")).collect();
    assert_eq!(collected, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_terminates_and_buffers_stay_readable() {
    let manager = BackgroundSessionManager::new();
    let start = manager
        .start(start_params("echo started; sleep 60", false))
        .await
        .unwrap();

    wait_for_output(&manager, start.session_id, |seen| seen.contains("started")).await;

    let stopped = manager
        .stop(StopSessionParams {
            session_id: start.session_id,
            force: false,
        })
        .await
        .unwrap();
    // The exit transition is asynchronous; poll briefly if the grace
    // window was not enough.
    let mut status = stopped.status;
    let deadline = Instant::now() + Duration::from_secs(5);
    while status == SessionStatus::Running && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = manager
            .read(read_params(start.session_id))
            .await
            .unwrap()
            .status;
    }
    assert_eq!(status, SessionStatus::Exited);

    // Buffers survive exit.
    let response = manager
        .read(ReadSessionParams {
            session_id: start.session_id,
            stream: StreamSelector::Stdout,
            max_chars: 8_000,
            peek: true,
        })
        .await
        .unwrap();
    assert!(response.stdout.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resize_rules_per_transport() {
    let manager = BackgroundSessionManager::new();

    let pty = manager.start(start_params("sleep 5", true)).await.unwrap();
    let resized = manager
        .resize(ResizeSessionParams {
            session_id: pty.session_id,
            cols: 1_000,
            rows: 5,
        })
        .await
        .unwrap();
    // Out-of-range values clamp instead of failing.
    assert_eq!(resized.cols, 400);
    assert_eq!(resized.rows, 10);

    let pipe = manager.start(start_params("sleep 5", false)).await.unwrap();
    let err = manager
        .resize(ResizeSessionParams {
            session_id: pipe.session_id,
            cols: 100,
            rows: 30,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LoafErr::Unsupported(_)));

    for id in [pty.session_id, pipe.session_id] {
        let _ = manager
            .stop(StopSessionParams {
                session_id: id,
                force: true,
            })
            .await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reuse_matches_name_cwd_and_terminal_flag() {
    let manager = BackgroundSessionManager::new();
    let cwd = std::env::temp_dir();

    let params = |full_terminal: bool| StartSessionParams {
        command: "sleep 60".to_string(),
        session_name: Some("worker".to_string()),
        cwd: Some(cwd.clone()),
        env: None,
        full_terminal,
        terminal_cols: 120,
        terminal_rows: 36,
        reuse_session: true,
    };

    let first = manager.start(params(true)).await.unwrap();
    assert!(!first.reused);

    let second = manager.start(params(true)).await.unwrap();
    assert!(second.reused);
    assert_eq!(second.session_id, first.session_id);

    // A mismatched full-terminal flag forces a new session.
    let third = manager.start(params(false)).await.unwrap();
    assert!(!third.reused);
    assert_ne!(third.session_id, first.session_id);

    let listed = manager.list().await;
    assert_eq!(listed.len(), 2);

    for descriptor in listed {
        let _ = manager
            .stop(StopSessionParams {
                session_id: descriptor.session_id,
                force: true,
            })
            .await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_keys_and_sessions_are_rejected() {
    let manager = BackgroundSessionManager::new();
    let start = manager.start(start_params("sleep 5", true)).await.unwrap();

    let err = manager
        .write(WriteSessionParams {
            session_id: start.session_id,
            input: None,
            append_newline: true,
            key: Some("warpdrive".to_string()),
            repeat: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LoafErr::Unsupported(_)));

    let err = manager
        .read(read_params(SessionId(4_000_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoafErr::NotFound(_)));

    let _ = manager
        .stop(StopSessionParams {
            session_id: start.session_id,
            force: true,
        })
        .await;
}
