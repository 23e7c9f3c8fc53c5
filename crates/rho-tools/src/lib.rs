mod context;
mod core;
mod exec;
mod filesystem;

pub use context::{ToolContext, ToolSummary};
pub use exec::{denied_substring, exec_toolbox, BashTool};
pub use filesystem::{filesystem_toolbox, is_local_path, ReadFileTool};
pub use self::core::{core_toolbox, ControlStateTool, GetModelVersionTool, ListToolsTool};

use std::sync::Arc;

use rho_agent_core::{RegistryError, ToolRegistry};

/// Registers every built-in toolbox. Called once from the entry point before
/// the registry is shared; manifest schema validation happens inside
/// registration and any violation is fatal.
pub fn register_builtin_toolboxes(
    registry: &mut ToolRegistry,
    ctx: Arc<ToolContext>,
) -> Result<(), RegistryError> {
    registry.register(core_toolbox(ctx))?;
    registry.register(exec_toolbox())?;
    registry.register(filesystem_toolbox())?;
    Ok(())
}
