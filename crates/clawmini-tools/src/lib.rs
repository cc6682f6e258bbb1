//! Tools the agent can call, behind the `ToolSet` port.
//!
//! - [`policy`]: command denylist
//! - [`terminal`]: shell commands with a timeout and bounded output
//! - [`files`]: `read_file` / `write_file` confined to the project root
//! - [`memory`]: `add_memory` / `search_memory`

pub mod files;
pub mod memory;
pub mod policy;
pub mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawmini_memory::{DEFAULT_TOP_K, MemoryIndexManager};
use clawmini_protocol::{CoreError, CoreResult, ToolCall, ToolDefinition, ToolSet};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, instrument, warn};

pub use files::{ReadFileTool, WriteFileTool, read_rooted, rooted_path, write_rooted};
pub use memory::{AddMemoryTool, SearchMemoryTool};
pub use policy::{CommandPolicy, DANGEROUS_COMMANDS};
pub use terminal::{CommandExecution, CommandLimits, TerminalTool};

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, input: &Value) -> Result<String>;
}

pub(crate) fn required_str<'a>(input: &'a Value, key: &str, tool: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("{tool} requires input.{key}"))
}

/// Everything the core tool set needs.
#[derive(Clone)]
pub struct CoreToolsConfig {
    pub project_root: PathBuf,
    pub policy: CommandPolicy,
    pub limits: CommandLimits,
    pub memory: Arc<MemoryIndexManager>,
    pub memory_top_k: usize,
}

impl CoreToolsConfig {
    pub fn new(
        project_root: impl Into<PathBuf>,
        policy: CommandPolicy,
        memory: Arc<MemoryIndexManager>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            policy,
            limits: CommandLimits::default(),
            memory,
            memory_top_k: DEFAULT_TOP_K,
        }
    }
}

/// Tools in registration order, which is the order the model sees them.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn with_core_tools(config: CoreToolsConfig) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(
            TerminalTool::new(config.policy, config.project_root.clone()).with_limits(config.limits),
        ));
        registry.register(Arc::new(ReadFileTool::new(config.project_root.clone())));
        registry.register(Arc::new(WriteFileTool::new(config.project_root)));
        registry.register(Arc::new(AddMemoryTool::new(config.memory.clone())));
        registry.register(Arc::new(
            SearchMemoryTool::new(config.memory).with_top_k(config.memory_top_k),
        ));
        registry
    }
}

fn to_core_error(error: anyhow::Error) -> CoreError {
    match error.downcast::<CoreError>() {
        Ok(core) => core,
        Err(other) => CoreError::ToolFailure(format!("{other:#}")),
    }
}

#[async_trait]
impl ToolSet for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    #[instrument(skip(self, call), fields(tool = %call.name, call_id = %call.id))]
    async fn invoke(&self, call: &ToolCall) -> CoreResult<String> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| CoreError::NotFound(format!("unknown tool: {}", call.name)))?;
        let output = tool.call(&call.arguments).await.map_err(to_core_error)?;
        debug!(output_len = output.len(), "tool call finished");
        Ok(output)
    }
}
