use std::sync::Arc;

use anyhow::Context as _;
use xexec::{
    load_config, ConfigFormat, CoordinatorConfig, ExecutionCoordinator, InMemoryEditor,
    Notification, Trigger, WorkspaceId,
};

const DEMO_PROGRAM: &str = r#"let total = 0;
let i = 1;
while (i <= 4) {
    debugger;
    total = total + i;
    i = i + 1;
}
display(total);
total;
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let source = match args.next() {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?,
        None => DEMO_PROGRAM.to_string(),
    };
    let config = match args.next() {
        Some(path) => {
            let content =
                std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
            let format = if path.ends_with(".json") {
                ConfigFormat::Json
            } else {
                ConfigFormat::Toml
            };
            load_config(&content, format)?
        }
        None => CoordinatorConfig::default(),
    };

    println!("=== xexec ===\n");

    let (coordinator, mut notifications) = ExecutionCoordinator::builder().config(config).build();
    let handle = coordinator.open_workspace(
        WorkspaceId::playground(),
        Arc::new(InMemoryEditor::with_text(source)),
    )?;
    handle.request_run(Trigger::EditorRun).await?;

    while let Some(envelope) = notifications.recv().await {
        match envelope.notification {
            Notification::Output { text } => println!("{}", text),
            Notification::BreakpointHintEmitted { line, message } => {
                println!("[hint] line {}: {}", line, message)
            }
            Notification::RunPaused { location } => {
                match location {
                    Some(location) => println!("[paused] {}", location),
                    None => println!("[paused]"),
                }
                if !handle.has_suspended_run() {
                    break;
                }
                handle.request_debug_resume().await?;
            }
            Notification::RunFinished { value } => {
                println!("\n=> {}", value);
                break;
            }
            Notification::RunErrored { diagnostics, hints } => {
                for diagnostic in diagnostics.iter().chain(hints.iter()) {
                    println!("{}", diagnostic);
                }
                break;
            }
            Notification::RunInterrupted => {
                println!("[interrupted]");
                break;
            }
            _ => {}
        }
    }

    coordinator.close_workspace(&WorkspaceId::playground()).await?;
    Ok(())
}
