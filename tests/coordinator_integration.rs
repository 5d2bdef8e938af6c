use std::sync::Arc;
use std::time::Duration;

use xexec::core::StopReason;
use xexec::{
    EditorBuffer, ErrorKind, ExecError, ExecutionCoordinator, InMemoryEditor, Notification,
    NotificationReceiver, SourceLocation, Trigger, Value, Variant, WorkspaceConfig,
    WorkspaceHandle, WorkspaceId,
};

/// Notifications up to and including the next terminal one.
async fn until_terminal(rx: &mut NotificationReceiver) -> Vec<Notification> {
    let mut seen = Vec::new();
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("notification channel closed");
        let terminal = envelope.notification.is_terminal();
        seen.push(envelope.notification);
        if terminal {
            return seen;
        }
    }
}

async fn terminal(rx: &mut NotificationReceiver) -> Notification {
    until_terminal(rx).await.pop().unwrap()
}

fn workspace(
    editor: &InMemoryEditor,
    config: WorkspaceConfig,
) -> (ExecutionCoordinator, WorkspaceHandle, NotificationReceiver) {
    let (coordinator, rx) = ExecutionCoordinator::builder().build();
    let handle = coordinator
        .open_workspace_with(WorkspaceId::playground(), Arc::new(editor.clone()), config)
        .unwrap();
    (coordinator, handle, rx)
}

#[tokio::test]
async fn test_one_plus_one() {
    let editor = InMemoryEditor::with_text("1 + 1;");
    let (coordinator, _handle, mut rx) = workspace(&editor, WorkspaceConfig::default());
    coordinator
        .submit_run(&WorkspaceId::playground(), Trigger::EditorRun)
        .await
        .unwrap();

    let seen = until_terminal(&mut rx).await;
    assert!(matches!(seen.first(), Some(Notification::RunStarted { .. })));
    match seen.last() {
        Some(Notification::RunFinished { value }) => assert_eq!(*value, Value::Int(2)),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_infinite_loop_hits_budget() {
    let editor = InMemoryEditor::with_text("while (true) {}");
    let (_coordinator, handle, mut rx) =
        workspace(&editor, WorkspaceConfig::default().with_timeout_ms(100));
    handle.request_run(Trigger::EditorRun).await.unwrap();

    match terminal(&mut rx).await {
        Notification::RunErrored { diagnostics, .. } => {
            assert_eq!(diagnostics[0].kind, ErrorKind::Runtime);
            assert!(diagnostics[0].message.starts_with("Potential infinite loop"));
        }
        other => panic!("unexpected {:?}", other),
    }
    let state = handle.state();
    assert!(!state.is_running);
    assert_eq!(state.last_stop, Some(StopReason::Errored));
    assert_eq!(state.execution_timeout_ms, 100);
    assert_eq!(state.step_limit, WorkspaceConfig::default().step_limit);
}

#[tokio::test]
async fn test_breakpoint_pauses_then_resumes() {
    let editor = InMemoryEditor::with_text(
        "let a = 1;\nlet b = 2;\nlet c = a + b;\ndisplay(c);\nc * 2;",
    );
    editor.set_breakpoints([3]);
    let (coordinator, handle, mut rx) = workspace(&editor, WorkspaceConfig::default());
    handle.request_run(Trigger::EditorRun).await.unwrap();

    match terminal(&mut rx).await {
        Notification::RunPaused { location } => assert_eq!(location, Some(SourceLocation::line(3))),
        other => panic!("unexpected {:?}", other),
    }
    let state = handle.state();
    assert!(!state.is_running && state.is_debugging);
    assert!(coordinator.registry().contains(&WorkspaceId::playground()));
    assert_eq!(editor.highlights(None), vec![(3, 3)]);

    handle.request_debug_resume().await.unwrap();
    let seen = until_terminal(&mut rx).await;
    assert!(seen
        .iter()
        .any(|n| matches!(n, Notification::Output { text } if text == "3")));
    match seen.last() {
        Some(Notification::RunFinished { value }) => assert_eq!(*value, Value::Int(6)),
        other => panic!("unexpected {:?}", other),
    }
    match rx.recv().await.unwrap().notification {
        Notification::ProgramEvaluated { previous_suspension, .. } => {
            assert_eq!(previous_suspension, Some(SourceLocation::line(3)));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(editor.highlights(None).is_empty());
    assert!(!handle.state().is_debugging);
    assert!(!handle.has_suspended_run());
}

#[tokio::test]
async fn test_fresh_run_discards_suspended_run() {
    let editor = InMemoryEditor::with_text("let a = 1;\na + 1;");
    editor.set_breakpoints([2]);
    let (_coordinator, handle, mut rx) = workspace(&editor, WorkspaceConfig::default());
    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunPaused { .. }));

    editor.set_breakpoints(std::iter::empty());
    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { .. }));
    assert!(matches!(
        handle.request_debug_resume().await,
        Err(ExecError::InvariantViolation(_))
    ));
}

#[tokio::test]
async fn test_interrupt_long_running_program() {
    let editor = InMemoryEditor::with_text("let i = 0;\nwhile (true) {\n  i = i + 1;\n}");
    let config = WorkspaceConfig::default()
        .with_timeout_ms(60_000)
        .with_step_limit(u64::MAX);
    let (_coordinator, handle, mut rx) = workspace(&editor, config);
    handle.request_run(Trigger::EditorRun).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.request_interrupt().await.unwrap();

    assert!(matches!(terminal(&mut rx).await, Notification::RunInterrupted));
    let state = handle.state();
    assert!(!state.is_running && !state.is_debugging);
    assert_eq!(state.last_stop, Some(StopReason::Interrupted));
}

#[tokio::test]
async fn test_debug_pause_then_resume_then_interrupt() {
    let editor = InMemoryEditor::with_text("let i = 0;\nwhile (true) {\n  i = i + 1;\n}");
    let config = WorkspaceConfig::default()
        .with_timeout_ms(60_000)
        .with_step_limit(u64::MAX);
    let (_coordinator, handle, mut rx) = workspace(&editor, config);
    handle.request_run(Trigger::EditorRun).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.request_debug_pause().await.unwrap();

    match terminal(&mut rx).await {
        Notification::RunPaused { location } => {
            let line = location.unwrap().line;
            assert!((2..=3).contains(&line));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(handle.state().is_debugging);

    handle.request_debug_resume().await.unwrap();
    assert!(handle.state().is_running);
    handle.request_interrupt().await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunInterrupted));
}

#[tokio::test]
async fn test_resume_without_suspension() {
    let editor = InMemoryEditor::with_text("1;");
    let (_coordinator, handle, _rx) = workspace(&editor, WorkspaceConfig::default());
    let err = handle.request_debug_resume().await.unwrap_err();
    assert!(matches!(err, ExecError::InvariantViolation(_)));
}

#[tokio::test]
async fn test_unplaceable_breakpoint_is_hinted() {
    let editor = InMemoryEditor::with_text("let total = 1 +\n2;\ntotal;");
    editor.set_breakpoints([2]);
    let (_coordinator, handle, mut rx) = workspace(&editor, WorkspaceConfig::default());
    handle.request_run(Trigger::EditorRun).await.unwrap();

    let seen = until_terminal(&mut rx).await;
    assert!(seen
        .iter()
        .any(|n| matches!(n, Notification::BreakpointHintEmitted { line: 2, .. })));
    assert!(matches!(seen.last(), Some(Notification::RunFinished { value: Value::Int(3) })));
}

#[tokio::test]
async fn test_lazy_bindings_are_not_forced_unless_used() {
    let source = "let boom = error(\"never\");\nlet x = 5;\nx;";

    let editor = InMemoryEditor::with_text(source);
    let (_coordinator, handle, mut rx) =
        workspace(&editor, WorkspaceConfig::default().with_variant(Variant::Lazy));
    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { value: Value::Int(5) }));

    let editor = InMemoryEditor::with_text(source);
    let (_coordinator, handle, mut rx) = workspace(&editor, WorkspaceConfig::default());
    handle.request_run(Trigger::EditorRun).await.unwrap();
    match terminal(&mut rx).await {
        Notification::RunErrored { diagnostics, .. } => {
            assert_eq!(diagnostics[0].message, "Error: never");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_try_again_walks_alternatives() {
    let editor = InMemoryEditor::with_text("let x = amb(1, 2, 3);\nrequire(x > 1);\nx;");
    let (_coordinator, handle, mut rx) = workspace(
        &editor,
        WorkspaceConfig::default().with_variant(Variant::NonDeterministic),
    );

    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { value: Value::Int(2) }));

    editor.set_text("try_again");
    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { value: Value::Int(3) }));

    handle.request_retry().await.unwrap();
    match terminal(&mut rx).await {
        Notification::RunErrored { diagnostics, .. } => {
            assert_eq!(diagnostics[0].message, "No more values.");
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(matches!(
        handle.request_retry().await,
        Err(ExecError::InvariantViolation(_))
    ));
}

#[tokio::test]
async fn test_folder_mode_runs_every_buffer() {
    let editor = InMemoryEditor::new();
    editor.open(EditorBuffer::new("let speed = 21;").at("/robot/lib"));
    editor.open(EditorBuffer::new("import \"/robot/lib\";\nspeed * 2;").at("/robot/main"));
    let config = WorkspaceConfig::default().with_folder("/robot", "/robot/main");
    let (_coordinator, handle, mut rx) = workspace(&editor, config);

    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { value: Value::Int(42) }));
}

#[tokio::test]
async fn test_folder_mode_breakpoint_in_imported_file() {
    let editor = InMemoryEditor::new();
    editor.open(
        EditorBuffer::new("let speed = 21;\nlet turn = 3;")
            .at("/robot/lib")
            .with_breakpoints([2]),
    );
    editor.open(EditorBuffer::new("import \"/robot/lib\";\nspeed + turn;").at("/robot/main"));
    let config = WorkspaceConfig::default().with_folder("/robot", "/robot/main");
    let (_coordinator, handle, mut rx) = workspace(&editor, config);

    handle.request_run(Trigger::EditorRun).await.unwrap();
    match terminal(&mut rx).await {
        Notification::RunPaused { location } => assert_eq!(
            location,
            Some(SourceLocation::new(Some("/robot/lib".into()), 2))
        ),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(editor.highlights(Some("/robot/lib")), vec![(2, 2)]);

    handle.request_debug_resume().await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { value: Value::Int(24) }));
}

#[tokio::test]
async fn test_sandboxed_variant() {
    let editor = InMemoryEditor::with_text("let x = 6;\nx * 7;");
    let (_coordinator, handle, mut rx) = workspace(
        &editor,
        WorkspaceConfig::default().with_variant(Variant::Sandboxed),
    );
    handle.request_run(Trigger::EditorRun).await.unwrap();
    assert!(matches!(terminal(&mut rx).await, Notification::RunFinished { value: Value::Int(42) }));
}

#[tokio::test]
async fn test_sandboxed_rejects_multi_file_programs() {
    let editor = InMemoryEditor::new();
    editor.open(EditorBuffer::new("let speed = 21;").at("/robot/lib"));
    editor.open(EditorBuffer::new("speed;").at("/robot/main"));
    let config = WorkspaceConfig::default()
        .with_variant(Variant::Sandboxed)
        .with_folder("/robot", "/robot/main");
    let (_coordinator, handle, mut rx) = workspace(&editor, config);

    handle.request_run(Trigger::EditorRun).await.unwrap();
    match terminal(&mut rx).await {
        Notification::RunErrored { diagnostics, .. } => {
            assert!(diagnostics[0].message.contains("single file"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_sandboxed_run_superseded_mid_race_leaves_no_output() {
    let editor = InMemoryEditor::with_text(
        "let i = 0;\nwhile (i < 100000000) {\n  display(i);\n  i = i + 1;\n}\ni;",
    );
    let config = WorkspaceConfig::default()
        .with_variant(Variant::Sandboxed)
        .with_timeout_ms(60_000)
        .with_step_limit(1 << 40);
    let (_coordinator, handle, mut rx) = workspace(&editor, config);

    handle.request_run(Trigger::EditorRun).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    editor.set_text("5;");
    handle.request_run(Trigger::EditorRun).await.unwrap();

    assert!(matches!(terminal(&mut rx).await, Notification::RunInterrupted));
    let second = until_terminal(&mut rx).await;
    assert!(matches!(second.first(), Some(Notification::RunStarted { .. })));
    assert!(
        !second.iter().any(|n| matches!(n, Notification::Output { .. })),
        "output of the interrupted run leaked: {} notifications",
        second.len()
    );
    assert!(matches!(second.last(), Some(Notification::RunFinished { value: Value::Int(5) })));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_deeply_nested_program_is_a_syntax_error() {
    let source = format!("{}1{};", "(".repeat(20_000), ")".repeat(20_000));
    let editor = InMemoryEditor::with_text(source);
    let (_coordinator, handle, mut rx) = workspace(&editor, WorkspaceConfig::default());

    handle.request_run(Trigger::EditorRun).await.unwrap();
    match terminal(&mut rx).await {
        Notification::RunErrored { diagnostics, .. } => {
            assert_eq!(diagnostics[0].kind, ErrorKind::Syntax);
            assert!(diagnostics[0].message.contains("nested too deeply"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!handle.state().is_running);
}

#[tokio::test]
async fn test_workspaces_run_independently() {
    let (coordinator, mut rx) = ExecutionCoordinator::builder().build();
    let slow = coordinator
        .open_workspace_with(
            "assessment",
            Arc::new(InMemoryEditor::with_text("while (true) {}")),
            WorkspaceConfig::default()
                .with_timeout_ms(60_000)
                .with_step_limit(u64::MAX),
        )
        .unwrap();
    let fast = coordinator
        .open_workspace("playground", Arc::new(InMemoryEditor::with_text("7;")))
        .unwrap();

    slow.request_run(Trigger::EditorRun).await.unwrap();
    fast.request_run(Trigger::EditorRun).await.unwrap();

    let finished = loop {
        let envelope = rx.recv().await.unwrap();
        if envelope.notification.is_terminal() {
            break envelope;
        }
    };
    assert_eq!(finished.workspace, WorkspaceId::playground());
    assert!(slow.state().is_running);

    coordinator.close_workspace(&WorkspaceId::new("assessment")).await.unwrap();
    let interrupted = loop {
        let envelope = rx.recv().await.unwrap();
        if envelope.workspace == WorkspaceId::new("assessment") {
            break envelope.notification;
        }
    };
    assert!(matches!(interrupted, Notification::RunInterrupted));
}
