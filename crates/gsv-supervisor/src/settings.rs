//! The game server's own settings file.
//!
//! The server keeps its options on a single line inside an ini section:
//!
//! ```text
//! [/Script/Pal.PalGameWorldSettings]
//! OptionSettings=(Difficulty=None,ServerName="My Server",AdminPassword="",RCONEnabled=False,RCONPort=25575)
//! ```
//!
//! [`ServerSettings`] treats that line as an ordered key-value list and keeps
//! every other line of the file untouched.

use crate::error::{SupervisorError, SupervisorResult};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;
use tracing::info;

/// Section that holds the option line.
pub const SECTION_HEADER: &str = "[/Script/Pal.PalGameWorldSettings]";
/// Switches the remote console on.
pub const REMOTE_ENABLED_KEY: &str = "RCONEnabled";
/// Port of the remote console.
pub const REMOTE_PORT_KEY: &str = "RCONPort";
/// Shared secret for the remote console.
pub const SECRET_KEY: &str = "AdminPassword";
/// Port used when the settings file names none.
pub const DEFAULT_REMOTE_PORT: u16 = 25575;

const OPTION_PREFIX: &str = "OptionSettings=";
const SECRET_LENGTH: usize = 16;

/// Parsed settings file that renders back with only the option line changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettings {
    lines: Vec<String>,
    option_line: Option<usize>,
    options: Vec<(String, String)>,
}

impl ServerSettings {
    /// Read the settings file. A missing file yields empty settings.
    pub fn load(path: &Path) -> SupervisorResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SupervisorError::settings(path, e.to_string())),
        }
    }

    /// Parse file contents. Lines other than the option line are kept verbatim.
    pub fn parse(content: &str) -> Self {
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let option_line = lines
            .iter()
            .position(|line| line.trim_start().starts_with(OPTION_PREFIX));

        let options = option_line
            .map(|index| parse_options(&lines[index]))
            .unwrap_or_default();

        Self {
            lines,
            option_line,
            options,
        }
    }

    /// Write the settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> SupervisorResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SupervisorError::settings(path, e.to_string()))?;
        }
        std::fs::write(path, self.render()).map_err(|e| SupervisorError::settings(path, e.to_string()))
    }

    /// File contents, with the option line added under its section if it was missing.
    pub fn render(&self) -> String {
        let option_line = format!("{}({})", OPTION_PREFIX, self.render_options());
        let mut lines = self.lines.clone();

        match self.option_line {
            Some(index) => lines[index] = option_line,
            None => {
                if !lines.iter().any(|l| l.trim() == SECTION_HEADER) {
                    lines.push(SECTION_HEADER.to_string());
                }
                lines.push(option_line);
            }
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn render_options(&self) -> String {
        self.options
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Raw value, quotes included.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value with surrounding quotes removed.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).map(unquote)
    }

    /// `True`/`False` in any case.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Value parsed as a port number.
    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get(key)?.parse().ok()
    }

    /// Set a raw value, appending the key if it is new.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.options.push((key.to_string(), value)),
        }
    }

    /// Set a quoted string value.
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set(key, format!("\"{}\"", value));
    }

    /// Configured remote console port, or the default.
    pub fn remote_port(&self) -> u16 {
        self.get_u16(REMOTE_PORT_KEY).unwrap_or(DEFAULT_REMOTE_PORT)
    }

    /// Shared secret, empty when unset.
    pub fn secret(&self) -> &str {
        self.get_str(SECRET_KEY).unwrap_or("")
    }

    /// Turn on the remote console and make sure a secret exists.
    ///
    /// Returns `true` if anything changed and the file needs saving.
    pub fn ensure_remote_access(&mut self) -> bool {
        let mut changed = false;

        if self.get_bool(REMOTE_ENABLED_KEY) != Some(true) {
            info!("Enabling remote console in server settings");
            self.set(REMOTE_ENABLED_KEY, "True");
            changed = true;
        }

        if self.secret().is_empty() {
            info!("Generating remote console secret");
            let secret: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SECRET_LENGTH)
                .map(char::from)
                .collect();
            self.set_str(SECRET_KEY, &secret);
            changed = true;
        }

        if self.get(REMOTE_PORT_KEY).is_none() {
            self.set(REMOTE_PORT_KEY, DEFAULT_REMOTE_PORT.to_string());
            changed = true;
        }

        changed
    }

    /// Number of options on the option line.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether the option line is absent or empty.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// `OptionSettings=(A=1,B="x,y")` into ordered pairs. Pairs without a key are dropped.
fn parse_options(line: &str) -> Vec<(String, String)> {
    let body = line.trim().trim_start_matches(OPTION_PREFIX).trim();
    let body = body.strip_prefix('(').unwrap_or(body);
    let body = body.strip_suffix(')').unwrap_or(body);

    split_outside_quotes(body)
        .into_iter()
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Split on commas that are not inside double quotes.
fn split_outside_quotes(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < body.len() {
        parts.push(&body[start..]);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "; generated by server\n[/Script/Pal.PalGameWorldSettings]\nOptionSettings=(Difficulty=None,ServerName=\"Pals, Inc\",AdminPassword=\"\",RCONEnabled=False,RCONPort=25576)\n";

    #[test]
    fn test_parse_keeps_quoted_commas() {
        let settings = ServerSettings::parse(SAMPLE);
        assert_eq!(settings.len(), 5);
        assert_eq!(settings.get("ServerName"), Some("\"Pals, Inc\""));
        assert_eq!(settings.get_str("ServerName"), Some("Pals, Inc"));
        assert_eq!(settings.get_bool(REMOTE_ENABLED_KEY), Some(false));
        assert_eq!(settings.remote_port(), 25576);
        assert_eq!(settings.secret(), "");
    }

    #[test]
    fn test_render_preserves_other_lines() {
        let settings = ServerSettings::parse(SAMPLE);
        assert_eq!(settings.render(), SAMPLE);
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let mut settings = ServerSettings::parse(SAMPLE);
        settings.set("Difficulty", "Hard");
        settings.set("NewKey", "1");
        assert_eq!(settings.get("Difficulty"), Some("Hard"));
        assert_eq!(settings.get_u16("NewKey"), Some(1));
        assert!(settings.render().contains("Difficulty=Hard,"));
    }

    #[test]
    fn test_ensure_remote_access() {
        let mut settings = ServerSettings::parse(SAMPLE);
        assert!(settings.ensure_remote_access());
        assert_eq!(settings.get_bool(REMOTE_ENABLED_KEY), Some(true));
        assert_eq!(settings.secret().len(), SECRET_LENGTH);
        assert_eq!(settings.remote_port(), 25576);

        let secret = settings.secret().to_string();
        assert!(!settings.ensure_remote_access());
        assert_eq!(settings.secret(), secret);
    }

    #[test]
    fn test_missing_file_is_created_with_remote_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Config/PalWorldSettings.ini");

        let mut settings = ServerSettings::load(&path).unwrap();
        assert!(settings.is_empty());
        assert!(settings.ensure_remote_access());
        settings.save(&path).unwrap();

        let reloaded = ServerSettings::load(&path).unwrap();
        assert_eq!(reloaded.render(), settings.render());
        assert!(reloaded.render().starts_with(SECTION_HEADER));
        assert_eq!(reloaded.remote_port(), DEFAULT_REMOTE_PORT);
        assert!(!reloaded.secret().is_empty());
    }
}
