//! Agent executor: the event producer behind every stream session
//!
//! One run walks `Idle → Thinking → ToolInvoking → Generating` and ends in
//! `Completed` or `Failed`:
//!
//! 1. `thinking` with the step plan
//! 2. optional tool step: `tool_start`, `tool_output` (redacted), `tool_end`
//! 3. generation fragments, buffered into `delta` events
//! 4. one `result` event
//!
//! A failing step yields a single `error` event and the run stops. The
//! bridge adds `start` and the terminal bookkeeping around all of this.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::redact::{redact, summarize, truncate};
use super::task::{Task, TaskAction};
use crate::constants;
use crate::error::{ConsumerGone, ProducerError, ToolError};
use crate::events::{Event, ToolOutputStatus};
use crate::generation::TextGenerator;
use crate::stream::{buffered, EventEmitter, EventProducer};
use crate::tools::{ConnectionStatus, ProbeOptions, ToolConnectivityManager};

/// Agent name used unless the executor is renamed
pub const DEFAULT_AGENT: &str = "SecurityAssistant";

/// Tool output included in the generation prompt
const PROMPT_TOOL_CHARS: usize = 4000;

/// Tool output carried by `tool_end`
const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Thinking,
    ToolInvoking,
    Generating,
    Completed,
    Failed,
}

enum StepError {
    /// Consumer gone or cancelled; stop without emitting
    Gone,
    Failed(ProducerError),
}

impl From<ConsumerGone> for StepError {
    fn from(_: ConsumerGone) -> Self {
        StepError::Gone
    }
}

impl From<ProducerError> for StepError {
    fn from(err: ProducerError) -> Self {
        StepError::Failed(err)
    }
}

/// What the tool step contributed to the answer
struct ToolOutcome {
    tool_name: String,
    success: bool,
    context: String,
}

/// Runs tasks against the shared tool registry and a text generator
pub struct AgentExecutor {
    name: String,
    tools: Arc<ToolConnectivityManager>,
    generator: Arc<dyn TextGenerator>,
    min_chunk_size: usize,
}

impl AgentExecutor {
    pub fn new(tools: Arc<ToolConnectivityManager>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: DEFAULT_AGENT.to_string(),
            tools,
            generator,
            min_chunk_size: constants::streaming::MIN_CHUNK_SIZE,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size.max(1);
        self
    }
}

#[async_trait]
impl EventProducer for AgentExecutor {
    type Input = Task;

    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, task: Task, emitter: &EventEmitter) -> Result<(), ConsumerGone> {
        let mut run = Run {
            executor: self,
            emitter,
            state: ExecutorState::Idle,
        };
        match run.execute(&task).await {
            Ok(()) => Ok(()),
            Err(StepError::Gone) => {
                debug!(agent = %self.name, state = ?run.state, "Run stopped, consumer gone");
                Err(ConsumerGone)
            }
            Err(StepError::Failed(err)) => {
                run.transition(ExecutorState::Failed);
                warn!(agent = %self.name, "Run failed: {}", err);
                emitter.fail(&err).await
            }
        }
    }
}

/// State of one `produce` call
struct Run<'a> {
    executor: &'a AgentExecutor,
    emitter: &'a EventEmitter,
    state: ExecutorState,
}

impl Run<'_> {
    fn transition(&mut self, next: ExecutorState) {
        debug!(agent = %self.executor.name, from = ?self.state, to = ?next, "Executor state");
        self.state = next;
    }

    fn agent(&self) -> &str {
        &self.executor.name
    }

    async fn emit(&self, event: Event) -> Result<(), StepError> {
        Ok(self.emitter.emit(event).await?)
    }

    /// Await `fut` unless the run is cancelled first
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, StepError> {
        tokio::select! {
            biased;
            _ = self.emitter.cancellation().cancelled() => Err(StepError::Gone),
            out = fut => Ok(out),
        }
    }

    async fn execute(&mut self, task: &Task) -> Result<(), StepError> {
        self.transition(ExecutorState::Thinking);
        self.emit(Event::thinking(self.agent(), thought_for(task), task.roadmap()))
            .await?;

        let outcome = match (&task.action, task.action.tool_name()) {
            (
                TaskAction::InvokeTool {
                    connection,
                    tool,
                    arguments,
                    description,
                },
                Some(tool_name),
            ) => Some(
                self.invoke_tool(
                    tool_name,
                    connection,
                    tool,
                    arguments.clone(),
                    description.clone(),
                )
                .await?,
            ),
            (TaskAction::InspectConnections { include_tools }, Some(tool_name)) => {
                Some(self.inspect_connections(tool_name, *include_tools).await?)
            }
            _ => None,
        };

        self.transition(ExecutorState::Generating);
        let prompt = build_prompt(&task.question, outcome.as_ref());
        let (chars_generated, chunks_emitted) = self.generate(&prompt).await?;

        self.transition(ExecutorState::Completed);
        let tool_success = outcome.as_ref().map(|o| o.success);
        let mut data = Map::new();
        data.insert(
            "tool_success".into(),
            tool_success.map(Value::Bool).unwrap_or(Value::Null),
        );
        data.insert("generation_success".into(), Value::Bool(true));
        data.insert("chars_generated".into(), json!(chars_generated));
        data.insert("chunks_emitted".into(), json!(chunks_emitted));
        info!(
            agent = %self.agent(),
            chars_generated,
            chunks_emitted,
            "Run completed"
        );
        self.emit(Event::result(
            self.agent(),
            tool_success.unwrap_or(true),
            data,
        ))
        .await
    }

    async fn invoke_tool(
        &mut self,
        tool_name: String,
        connection: &str,
        tool: &str,
        arguments: Value,
        description: Option<String>,
    ) -> Result<ToolOutcome, StepError> {
        if !self.executor.tools.contains(connection) {
            return Err(ProducerError::Tool(ToolError::NotFound(connection.to_string())).into());
        }

        self.transition(ExecutorState::ToolInvoking);
        let description =
            description.unwrap_or_else(|| format!("Calling {} on {}", tool, connection));
        self.emit(Event::tool_start(self.agent(), &tool_name, Some(description)))
            .await?;

        let call = self
            .cancellable(self.executor.tools.call_tool(connection, tool, arguments))
            .await?;

        let (status, output) = match call {
            Ok(result) => {
                let is_error = result
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let status = if is_error {
                    ToolOutputStatus::Error
                } else {
                    ToolOutputStatus::Success
                };
                (status, redact(&result))
            }
            Err(ToolError::NotFound(name)) => {
                // Removed between the check above and the call
                return Err(ProducerError::Tool(ToolError::NotFound(name)).into());
            }
            Err(e) => {
                warn!(connection, tool, "Tool call failed: {}", e);
                (
                    ToolOutputStatus::Error,
                    redact(&json!({ "error": e.to_string() })),
                )
            }
        };

        let summary = summarize(&output, SUMMARY_CHARS);
        let context = summarize(&output, PROMPT_TOOL_CHARS);
        self.emit(Event::tool_output(
            self.agent(),
            &tool_name,
            status,
            Some(output),
        ))
        .await?;
        self.emit(Event::tool_end(self.agent(), &tool_name, Some(summary)))
            .await?;

        Ok(ToolOutcome {
            tool_name,
            success: status == ToolOutputStatus::Success,
            context,
        })
    }

    async fn inspect_connections(
        &mut self,
        tool_name: String,
        include_tools: bool,
    ) -> Result<ToolOutcome, StepError> {
        self.transition(ExecutorState::ToolInvoking);
        let count = self.executor.tools.len();
        self.emit(Event::tool_start(
            self.agent(),
            &tool_name,
            Some(format!("Probing {} tool connections", count)),
        ))
        .await?;

        let snapshots = self
            .cancellable(self.executor.tools.statuses(ProbeOptions::full(include_tools)))
            .await?;

        let active = snapshots
            .iter()
            .filter(|s| s.status == ConnectionStatus::Active)
            .count();
        let mut lines = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            let mut line = format!(
                "- {} ({}): {}",
                snapshot.name, snapshot.transport, snapshot.status
            );
            if let Some(error) = &snapshot.error {
                line.push_str(&format!(" ({})", error));
            }
            if let Some(catalog) = &snapshot.catalog {
                if !catalog.tools.is_empty() {
                    line.push_str(&format!("; tools: {}", catalog.tools.join(", ")));
                }
            }
            lines.push(line);
        }
        let context = if lines.is_empty() {
            "No tool connections are registered.".to_string()
        } else {
            lines.join("\n")
        };

        let output = redact(&serde_json::to_value(&snapshots).unwrap_or_default());
        self.emit(Event::tool_output(
            self.agent(),
            &tool_name,
            ToolOutputStatus::Success,
            Some(output),
        ))
        .await?;
        self.emit(Event::tool_end(
            self.agent(),
            &tool_name,
            Some(format!("{}/{} connections active", active, snapshots.len())),
        ))
        .await?;

        Ok(ToolOutcome {
            tool_name,
            success: true,
            context: truncate(&context, PROMPT_TOOL_CHARS),
        })
    }

    /// Stream the answer as `delta` events; returns (chars, chunks)
    async fn generate(&mut self, prompt: &str) -> Result<(usize, usize), StepError> {
        let fragments = self
            .cancellable(self.executor.generator.generate(prompt))
            .await?
            .map_err(ProducerError::from)?;

        let mut chunks = Box::pin(buffered(fragments, self.executor.min_chunk_size));
        let mut chars = 0usize;
        let mut count = 0usize;
        loop {
            let next = self.cancellable(chunks.next()).await?;
            match next {
                Some(Ok(chunk)) => {
                    chars += chunk.chars().count();
                    count += 1;
                    self.emit(Event::delta(self.agent(), chunk)).await?;
                }
                Some(Err(e)) => {
                    debug!(agent = %self.agent(), chars, "Generation failed mid-stream");
                    return Err(ProducerError::from(e).into());
                }
                None => break,
            }
        }
        Ok((chars, count))
    }
}

fn thought_for(task: &Task) -> String {
    match &task.action {
        TaskAction::Answer => "Answering directly from the question".to_string(),
        TaskAction::InvokeTool {
            connection, tool, ..
        } => format!("Need output from {} on {} before answering", tool, connection),
        TaskAction::InspectConnections { .. } => {
            "Checking tool connection health before answering".to_string()
        }
    }
}

fn build_prompt(question: &str, outcome: Option<&ToolOutcome>) -> String {
    match outcome {
        None => question.to_string(),
        Some(outcome) => {
            let state = if outcome.success { "succeeded" } else { "failed" };
            format!(
                "Question: {}\n\nTool output from {} ({}):\n{}\n\nAnswer the question using the tool output above.",
                question, outcome.tool_name, state, outcome.context
            )
        }
    }
}
