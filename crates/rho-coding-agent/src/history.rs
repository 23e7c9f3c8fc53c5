use std::io::Write;
use std::path::{Path, PathBuf};

const HISTORY_FILE_NAME: &str = ".rho_history";
const MAX_ENTRIES: usize = 1000;

/// Submitted input lines, persisted one per line. Loading and saving are
/// best effort; a missing or unwritable history file never blocks a session.
pub struct InputHistory {
    entries: Vec<String>,
    path: Option<PathBuf>,
}

impl InputHistory {
    pub fn load_default() -> Self {
        match std::env::var_os("HOME") {
            Some(home) => Self::load(Path::new(&home).join(HISTORY_FILE_NAME)),
            None => Self {
                entries: Vec::new(),
                path: None,
            },
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .map(|raw| {
                raw.lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            entries,
            path: Some(path),
        }
    }

    /// Appends an entry, skipping empty lines and immediate repeats, and
    /// dropping the oldest entries beyond the cap.
    pub fn push(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        if self.entries.last().map(String::as_str) == Some(entry) {
            return;
        }

        self.entries.push(entry.to_string());
        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = std::fs::File::create(path)?;
        for entry in &self.entries {
            writeln!(file, "{entry}")?;
        }
        Ok(())
    }
}
