//! Client command parsing and routing (§4.G ingest contract).
//!
//! The wire shape handed to the supervised subprocess for `send_message` is
//! not specified anywhere upstream (§6: "subprocess wire format is the
//! subprocess's own concern") — this module owns that choice.

use std::sync::Arc;

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use vigil_core::{ProjectId, RequestId, SessionId};
use vigil_runtime::{PermissionMode, PermissionResponse, RuntimeError, Supervisor, WrapperSpawnConfig};
use vigil_settings::WrapperLaunchConfig;
use vigil_transcript::{PendingTitleStore, TranscriptError, TranscriptStore};

use crate::metrics::{COMMANDS_DISPATCHED_TOTAL, COMMAND_ERRORS_TOTAL};

/// One command a client may send over its WebSocket connection (§4.G).
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Send a turn to a session, creating it (and its process) first if
    /// `session_id` is absent or not currently running.
    SendMessage {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        project_id: Option<ProjectId>,
        text: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        attachments: Vec<Value>,
    },
    KillProcess {
        session_id: SessionId,
    },
    PendingRequestResponse {
        session_id: SessionId,
        request_id: RequestId,
        result: PermissionResult,
        #[serde(default)]
        updated_input: Option<Value>,
    },
    /// Mark a session as still being viewed, without sending it anything.
    Touch {
        session_id: SessionId,
    },
    Ping,
}

/// The client's coarse decision on a pending permission prompt (§4.G).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionResult {
    Allow,
    Deny,
}

/// What happened after dispatching a [`ClientCommand`], for the session loop
/// to react to (bind the connection, or answer a ping).
#[derive(Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The connection should be (or remain) bound to this session.
    Session(SessionId),
    /// Reply with a `pong` event.
    Pong,
}

/// Errors returned to the client that issued a bad command, as opposed to
/// ones that drive a process to `DEAD` (§7).
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown project {0}")]
    UnknownProject(ProjectId),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("send_message requires a project_id when starting a new session")]
    MissingProject,
    #[error("send_message requires non-empty text to start a new session")]
    EmptyText,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Store(#[from] TranscriptError),
}

impl CommandError {
    /// Short label for the `command_errors_total` metric (§10.2).
    fn kind(&self) -> &'static str {
        match self {
            Self::UnknownProject(_) => "unknown_project",
            Self::UnknownSession(_) => "unknown_session",
            Self::MissingProject => "missing_project",
            Self::EmptyText => "empty_text",
            Self::Runtime(_) => "runtime",
            Self::Store(_) => "store",
        }
    }
}

/// Metric label for a command, stable across its field values (§10.2).
fn command_label(command: &ClientCommand) -> &'static str {
    match command {
        ClientCommand::SendMessage { .. } => "send_message",
        ClientCommand::KillProcess { .. } => "kill_process",
        ClientCommand::PendingRequestResponse { .. } => "pending_request_response",
        ClientCommand::Touch { .. } => "touch",
        ClientCommand::Ping => "ping",
    }
}

/// Everything command dispatch needs: the process registry, the transcript
/// store, the process-wide pending-title map, and the subprocess launch
/// recipe (§4.F, §4.G, §4.H).
pub struct CommandContext {
    pub supervisor: Arc<Supervisor>,
    pub store: Arc<TranscriptStore>,
    pub pending_titles: Arc<PendingTitleStore>,
    pub wrapper: WrapperLaunchConfig,
}

impl CommandContext {
    /// Route one parsed command (§4.G ingest list).
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the command names an unknown project or
    /// session, or if the runtime rejects the operation.
    pub async fn dispatch(&self, command: ClientCommand) -> Result<CommandOutcome, CommandError> {
        let label = command_label(&command);
        counter!(COMMANDS_DISPATCHED_TOTAL, "command" => label).increment(1);
        let result = self.dispatch_inner(command).await;
        if let Err(err) = &result {
            counter!(COMMAND_ERRORS_TOTAL, "command" => label, "error_type" => err.kind()).increment(1);
        }
        result
    }

    async fn dispatch_inner(&self, command: ClientCommand) -> Result<CommandOutcome, CommandError> {
        match command {
            ClientCommand::Ping => Ok(CommandOutcome::Pong),
            ClientCommand::Touch { session_id } => {
                self.supervisor.touch(&session_id);
                Ok(CommandOutcome::Session(session_id))
            }
            ClientCommand::KillProcess { session_id } => {
                self.supervisor.kill_process(&session_id, Some("client requested".to_string())).await;
                Ok(CommandOutcome::Session(session_id))
            }
            ClientCommand::PendingRequestResponse { session_id, request_id, result, updated_input } => {
                let response = match result {
                    PermissionResult::Allow => PermissionResponse::AllowOnce { updated_input },
                    PermissionResult::Deny => PermissionResponse::Deny { reason: None },
                };
                self.supervisor.resolve_pending_request(&session_id, &request_id, response)?;
                Ok(CommandOutcome::Session(session_id))
            }
            ClientCommand::SendMessage { session_id, project_id, text, title, attachments } => {
                self.send_message(session_id, project_id, text, title, attachments).await
            }
        }
    }

    async fn send_message(
        &self,
        session_id: Option<SessionId>,
        project_id: Option<ProjectId>,
        text: String,
        title: Option<String>,
        attachments: Vec<Value>,
    ) -> Result<CommandOutcome, CommandError> {
        let message = serde_json::json!({ "type": "user_message", "text": text, "attachments": attachments });

        if let Some(session_id) = session_id {
            self.stash_title_if_new(&session_id, title)?;
            return self.send_to_existing_or_resume(session_id, message).await;
        }

        let project_id = project_id.ok_or(CommandError::MissingProject)?;
        if text.trim().is_empty() {
            return Err(CommandError::EmptyText);
        }
        let project = self.store.get_project(&project_id)?.ok_or_else(|| CommandError::UnknownProject(project_id))?;

        let session_id = SessionId::new();
        if let Some(title) = title {
            self.pending_titles.set(session_id.clone(), title);
        }
        let spawn = self.fresh_spawn_config(&project);
        self.supervisor.create_session(session_id.clone(), project.id, spawn).await?;
        self.supervisor.send_to_session(&session_id, message).await?;
        Ok(CommandOutcome::Session(session_id))
    }

    /// Per §4.G: a title on a `send_message` for a session not yet in
    /// storage goes into the Pending-Title Store rather than being applied
    /// directly, since the session record doesn't exist yet to hold it.
    fn stash_title_if_new(&self, session_id: &SessionId, title: Option<String>) -> Result<(), CommandError> {
        let Some(title) = title else { return Ok(()) };
        if self.store.get_session(session_id)?.is_none() {
            self.pending_titles.set(session_id.clone(), title);
        }
        Ok(())
    }

    async fn send_to_existing_or_resume(
        &self,
        session_id: SessionId,
        message: Value,
    ) -> Result<CommandOutcome, CommandError> {
        match self.supervisor.send_to_session(&session_id, message.clone()).await {
            Ok(()) => Ok(CommandOutcome::Session(session_id)),
            Err(RuntimeError::SessionNotFound(_)) => {
                let session = self
                    .store
                    .get_session(&session_id)?
                    .ok_or_else(|| CommandError::UnknownSession(session_id.clone()))?;
                let project = self
                    .store
                    .get_project(&session.project_id)?
                    .ok_or(CommandError::UnknownProject(session.project_id))?;
                let spawn = self.resume_spawn_config(&project, &session_id);
                self.supervisor.create_session(session_id.clone(), project.id, spawn).await?;
                self.supervisor.send_to_session(&session_id, message).await?;
                Ok(CommandOutcome::Session(session_id))
            }
            Err(other) => Err(other.into()),
        }
    }

    fn fresh_spawn_config(&self, project: &vigil_transcript::Project) -> WrapperSpawnConfig {
        WrapperSpawnConfig {
            program: self.wrapper.program.clone(),
            args: self.wrapper.args.clone(),
            cwd: project.resolved_cwd.clone().unwrap_or_else(|| project.path.clone()),
            model: self.wrapper.default_model.clone(),
            permission_mode: PermissionMode::default(),
        }
    }

    fn resume_spawn_config(&self, project: &vigil_transcript::Project, session_id: &SessionId) -> WrapperSpawnConfig {
        let mut args = self.wrapper.args.clone();
        args.push(self.wrapper.resume_flag.clone());
        args.push(session_id.as_str().to_string());
        WrapperSpawnConfig {
            program: self.wrapper.program.clone(),
            args,
            cwd: project.resolved_cwd.clone().unwrap_or_else(|| project.path.clone()),
            model: self.wrapper.default_model.clone(),
            permission_mode: PermissionMode::default(),
        }
    }
}
