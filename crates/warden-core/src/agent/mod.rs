//! Agent execution
//!
//! - `Task` / `TaskAction` - what a session is asked to do
//! - `AgentExecutor` - the event producer that carries a task out
//! - `redact` - secret masking for tool output shown to clients

pub mod executor;
pub mod redact;
pub mod task;

pub use executor::{AgentExecutor, ExecutorState, DEFAULT_AGENT};
pub use task::{Task, TaskAction};
