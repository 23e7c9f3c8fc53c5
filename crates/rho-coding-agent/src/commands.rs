/// Slash commands accepted at the prompt, alphabetical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: &'static str,
    pub description: &'static str,
}

pub const COMMANDS: &[SlashCommand] = &[
    SlashCommand {
        name: "/exit",
        description: "Exit the session",
    },
    SlashCommand {
        name: "/help",
        description: "Show help information",
    },
    SlashCommand {
        name: "/model",
        description: "List models or switch with /model <id|provider>",
    },
    SlashCommand {
        name: "/speech",
        description: "Toggle speech-to-text input on/off",
    },
    SlashCommand {
        name: "/tools",
        description: "Toggle tools on/off",
    },
];

/// Commands whose name or description contains the typed text (without the
/// leading slash). Bare "/" lists everything.
pub fn filter_commands(input: &str) -> Vec<&'static SlashCommand> {
    let needle = input.trim_start_matches('/').to_ascii_lowercase();
    if needle.is_empty() {
        return COMMANDS.iter().collect();
    }

    COMMANDS
        .iter()
        .filter(|command| {
            command
                .name
                .trim_start_matches('/')
                .to_ascii_lowercase()
                .contains(&needle)
                || command.description.to_ascii_lowercase().contains(&needle)
        })
        .collect()
}
