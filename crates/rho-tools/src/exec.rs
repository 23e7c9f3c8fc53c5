use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use rho_agent_core::{Tool, ToolManifest, ToolOutcome, Toolbox};

const BASH_MANIFEST: &str = include_str!("manifests/bash.json");

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Substrings that block execution outright. The check runs on the raw
/// lowercased script text before any process is spawned.
const DENYLIST: &[&str] = &[
    // destructive filesystem operations
    "rm -rf",
    "rm -r",
    "rmdir",
    "mkfs",
    "dd",
    "shred",
    "truncate",
    // machine control
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    // firewall surgery
    "iptables",
    "ip6tables",
    "ufw",
    // account management
    "passwd",
    "useradd",
    "userdel",
    "groupadd",
    "groupdel",
    // privilege escalation
    "sudo",
    "su",
    "doas",
    // writes into device and kernel pseudo-filesystems
    "> /dev/null",
    ">/dev/null",
    "> /dev/",
    ">/dev/",
    "> /proc/",
    ">/proc/",
    "> /sys/",
    ">/sys/",
    // command chaining
    "|",
    "||",
    "&&",
    ";",
    "$(",
    "`",
];

pub fn exec_toolbox() -> Toolbox {
    Toolbox::new("exec", "Local command execution").add_tool(BashTool::new())
}

pub struct BashTool {
    manifest: ToolManifest,
}

impl BashTool {
    pub fn new() -> Self {
        Self {
            manifest: ToolManifest::parse(BASH_MANIFEST).expect("embedded manifest is valid"),
        }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the denylist entry a script trips on, if any.
pub fn denied_substring(script: &str) -> Option<&'static str> {
    let lowered = script.to_lowercase();
    DENYLIST
        .iter()
        .find(|entry| lowered.contains(**entry))
        .copied()
}

fn effective_timeout_secs(requested: Option<u64>) -> u64 {
    match requested {
        Some(secs) if secs > 0 && secs < MAX_TIMEOUT_SECS => secs,
        _ => DEFAULT_TIMEOUT_SECS,
    }
}

#[async_trait]
impl Tool for BashTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn execute(&self, input: Value, cancel: &CancellationToken) -> ToolOutcome {
        #[derive(Deserialize)]
        struct BashInput {
            script: String,
            #[serde(default)]
            timeout: Option<u64>,
            #[serde(default)]
            work_dir: Option<String>,
        }

        let input: BashInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(error) => {
                return ToolOutcome::error(format!("Error parsing input parameters: {error}"))
            }
        };

        if input.script.trim().is_empty() {
            return ToolOutcome::error("script parameter cannot be empty");
        }

        if let Some(denied) = denied_substring(&input.script) {
            return ToolOutcome::error(format!(
                "Command rejected for security reasons: contains '{denied}'"
            ));
        }

        let timeout_secs = effective_timeout_secs(input.timeout);

        let mut command = Command::new("bash");
        command.arg("-c").arg(&input.script);
        command.kill_on_drop(true);
        if let Some(work_dir) = &input.work_dir {
            command.current_dir(work_dir);
        }

        let run = timeout(std::time::Duration::from_secs(timeout_secs), command.output());
        let output = tokio::select! {
            result = run => result,
            _ = cancel.cancelled() => {
                return ToolOutcome::error("command cancelled");
            }
        };

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return ToolOutcome::error(format!("Execution failed: {error}"));
            }
            Err(_) => {
                return ToolOutcome::error(format!(
                    "Command execution timed out after {timeout_secs} seconds"
                ));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return ToolOutcome::error(format!("Command exited with status {code}\n{combined}"));
        }

        ToolOutcome::ok(combined.trim().to_string())
    }
}
