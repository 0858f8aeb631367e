use cadre_core::events::EventHandler;
use cadre_types::{ActionKind, Event, EventSource, ObservationKind};

/// Prints stream events for the interactive session.
pub struct Display;

fn show_message(message: &str) {
    if !message.is_empty() {
        println!("🤖 {}\n", message);
    }
}

fn show_output(output: &str) {
    for line in output.lines() {
        println!("  {}", line);
    }
    println!();
}

#[async_trait::async_trait]
impl EventHandler for Display {
    async fn on_event(&self, event: Event) {
        if let Some(action) = event.as_action() {
            if !action.thought.is_empty() {
                show_message(&action.thought);
            }
            match &action.kind {
                ActionKind::Message {
                    content,
                    displayable,
                    ..
                } => {
                    if *displayable && event.source == EventSource::Agent {
                        show_message(content);
                    }
                }
                ActionKind::CmdRun { command } => println!("❯ {}\n", command),
                ActionKind::FileEdit { path, .. } => println!("✎ {}\n", path),
                ActionKind::CreatePlan { title, .. } => {
                    println!("📋 Plan created: {}\n", title)
                }
                ActionKind::MarkTask {
                    task_index,
                    task_status,
                    task_content,
                    ..
                } => {
                    println!("{} task {}: {}\n", task_status.mark(), task_index, task_content)
                }
                ActionKind::Finish { final_thought, .. } => show_message(final_thought),
                _ => {}
            }
        }

        if let Some(observation) = event.as_observation() {
            match &observation.kind {
                ObservationKind::CmdOutput { .. } | ObservationKind::FunctionHub { .. } => {
                    show_output(&observation.content)
                }
                ObservationKind::FileEdit { path } => println!("✎ wrote {}\n", path),
                ObservationKind::Error => println!("⚠ {}\n", observation.content),
                _ => {}
            }
        }
    }
}
