use std::sync::Arc;

use tokio::process::Command;

use cadre_core::events::{EventHandler, EventStream, StreamSubscriber};
use cadre_core::hub::FunctionHubClient;
use cadre_types::{
    ActionKind, ConfirmationStatus, Event, EventSource, Observation, ObservationKind,
};

/// Minimal local runtime standing in for the sandbox: shell commands run
/// through `sh -c`, file edits write to disk, and hub tool calls route to
/// the Function Hub. Everything else gets an error observation so the
/// controller loop stays well-formed.
pub struct LocalRuntime {
    event_stream: Arc<EventStream>,
    hub: Option<FunctionHubClient>,
    /// Working directory for commands and relative file paths, typically
    /// the selected repository.
    workdir: Option<std::path::PathBuf>,
}

impl LocalRuntime {
    pub fn attach(
        event_stream: Arc<EventStream>,
        hub: Option<FunctionHubClient>,
        workdir: Option<std::path::PathBuf>,
    ) -> Arc<Self> {
        let runtime = Arc::new(Self {
            event_stream: event_stream.clone(),
            hub,
            workdir,
        });
        event_stream.subscribe(StreamSubscriber::Runtime, runtime.clone(), "local-runtime");
        runtime
    }

    async fn run_command(&self, command: &str) -> Observation {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(workdir) = &self.workdir {
            cmd.current_dir(workdir);
        }
        match cmd.output().await {
            Ok(output) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let mut content = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&stderr);
                }
                Observation::new(ObservationKind::CmdOutput { exit_code }, content)
            }
            Err(e) => Observation::error(format!("Failed to spawn command: {}", e)),
        }
    }

    async fn edit_file(&self, path: &str, content: &str) -> Observation {
        let resolved;
        let path = match &self.workdir {
            Some(workdir) if !std::path::Path::new(path).is_absolute() => {
                resolved = workdir.join(path).to_string_lossy().into_owned();
                resolved.as_str()
            }
            _ => path,
        };
        if let Some(parent) = std::path::Path::new(path).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Observation::error(format!("Failed to create {}: {}", parent.display(), e));
            }
        }
        match tokio::fs::write(path, content).await {
            Ok(()) => Observation::new(
                ObservationKind::FileEdit { path: path.to_string() },
                format!("Wrote {} bytes to {}", content.len(), path),
            ),
            Err(e) => Observation::error(format!("Failed to write {}: {}", path, e)),
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for LocalRuntime {
    async fn on_event(&self, event: Event) {
        let Some(action) = event.as_action() else {
            return;
        };
        if !action.runnable() {
            return;
        }
        // Recalls are answered by the memory service.
        if matches!(action.kind, ActionKind::Recall { .. }) {
            return;
        }
        // Parked actions wait for the user's decision; rejected ones are
        // answered without running so the pending slot clears.
        if action.confirmation_state == Some(ConfirmationStatus::AwaitingConfirmation) {
            return;
        }
        if action.confirmation_state == Some(ConfirmationStatus::Rejected) {
            let mut observation =
                Observation::error("Action has been rejected by the user.").with_cause(event.id);
            if let Some(metadata) = &action.tool_call_metadata {
                observation = observation.with_metadata(metadata.clone());
            }
            self.event_stream
                .publish(observation, EventSource::Environment)
                .await;
            return;
        }

        let observation = match &action.kind {
            ActionKind::CmdRun { command } => self.run_command(command).await,
            ActionKind::FileEdit { path, content } => self.edit_file(path, content).await,
            ActionKind::ToolCall {
                name,
                arguments,
                external_id: Some(external_id),
            } => match &self.hub {
                Some(hub) => hub.execute(name, external_id, arguments).await,
                None => Observation::error("Function hub is not configured."),
            },
            ActionKind::CodeCellRun { .. } => {
                Observation::error("No code interpreter is available in the local runtime.")
            }
            ActionKind::ToolCall { name, .. } => {
                Observation::error(format!("Tool '{}' is not available in the local runtime.", name))
            }
            _ => return,
        };

        let mut observation = observation.with_cause(event.id);
        if let Some(metadata) = &action.tool_call_metadata {
            observation = observation.with_metadata(metadata.clone());
        }
        self.event_stream
            .publish(observation, EventSource::Environment)
            .await;
    }
}
