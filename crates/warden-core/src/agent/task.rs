//! What a producer is asked to do
//!
//! The action is a closed set: each variant maps to a fixed step plan in
//! the executor, so there is no free-form tool routing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool name reported for the connection health step
pub const INSPECT_TOOL_NAME: &str = "inspect_connections";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    /// Answer from the question alone
    Answer,
    /// Call one tool, then answer using its output
    InvokeTool {
        connection: String,
        tool: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Probe every registered connection, then answer about their health
    InspectConnections {
        #[serde(default)]
        include_tools: bool,
    },
}

impl TaskAction {
    /// Display name of the tool step, if the action has one
    pub fn tool_name(&self) -> Option<String> {
        match self {
            TaskAction::Answer => None,
            TaskAction::InvokeTool {
                connection, tool, ..
            } => Some(format!("{}/{}", connection, tool)),
            TaskAction::InspectConnections { .. } => Some(INSPECT_TOOL_NAME.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub question: String,
    #[serde(flatten)]
    pub action: TaskAction,
}

impl Task {
    pub fn answer(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            action: TaskAction::Answer,
        }
    }

    pub fn invoke_tool(
        question: impl Into<String>,
        connection: impl Into<String>,
        tool: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            question: question.into(),
            action: TaskAction::InvokeTool {
                connection: connection.into(),
                tool: tool.into(),
                arguments,
                description: None,
            },
        }
    }

    pub fn inspect_connections(question: impl Into<String>, include_tools: bool) -> Self {
        Self {
            question: question.into(),
            action: TaskAction::InspectConnections { include_tools },
        }
    }

    /// Steps announced in the `thinking` event
    pub fn roadmap(&self) -> Vec<String> {
        let mut steps = Vec::new();
        match &self.action {
            TaskAction::Answer => {}
            TaskAction::InvokeTool {
                connection, tool, ..
            } => steps.push(format!("Run {} on {}", tool, connection)),
            TaskAction::InspectConnections { include_tools } => {
                if *include_tools {
                    steps.push("Probe tool connections and list their tools".to_string());
                } else {
                    steps.push("Probe tool connections".to_string());
                }
            }
        }
        steps.push("Generate answer".to_string());
        steps
    }
}
