//! Stdio transport: newline-delimited JSON-RPC over a child process

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, trace};

use crate::error::ToolError;

use super::jsonrpc::{parse_message, Notification, Request};
use super::RpcChannel;

pub(crate) struct StdioChannel {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
}

impl StdioChannel {
    pub(crate) fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, ToolError> {
        info!(connection = %name, "Spawning tool server: {} ({} args)", command, args.len());

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Connect(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Connect("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Connect("child stdout unavailable".into()))?;

        Ok(Self {
            name: name.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    async fn write_line(&mut self, json: String) -> Result<(), ToolError> {
        self.stdin.write_all(json.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for StdioChannel {
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let id = self.next_id;
        self.next_id += 1;

        let json = serde_json::to_string(&Request::new(id, method, params))?;
        debug!(connection = %self.name, "Tool request [{}]: {}", id, method);
        self.write_line(json).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = self.stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(ToolError::Connect(format!(
                    "tool server '{}' closed its output",
                    self.name
                )));
            }
            match parse_message(&line) {
                Some(message) if message.answers(id) => return message.into_result(),
                Some(message) => {
                    trace!(connection = %self.name, "Skipping message {:?}", message.method)
                }
                None => trace!(connection = %self.name, "Skipping non-JSON output"),
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ToolError> {
        let json = serde_json::to_string(&Notification::new(method, params))?;
        debug!(connection = %self.name, "Tool notification: {}", method);
        self.write_line(json).await
    }

    async fn shutdown(&mut self) {
        let _ = self.stdin.shutdown().await;
        if let Err(e) = self.child.kill().await {
            debug!(connection = %self.name, "Tool server already exited: {}", e);
        }
    }
}
