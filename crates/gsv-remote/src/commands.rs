//! Command strings understood by the server's administrative console.

use gsv_common::ServerVersion;

/// Ask for the server banner, which carries the version.
pub fn info() -> String {
    "Info".to_string()
}

/// Flush the world to disk.
pub fn save() -> String {
    "Save".to_string()
}

/// Shut down after `seconds`, showing `message` to connected players.
pub fn shutdown(seconds: u64, message: &str) -> String {
    format!("Shutdown {} {}", seconds, sanitize(message))
}

/// Show `message` to every connected player.
pub fn broadcast(message: &str) -> String {
    format!("Broadcast {}", sanitize(message))
}

/// The server cuts messages at the first space.
pub fn sanitize(message: &str) -> String {
    message.trim().replace(' ', "_")
}

/// Version from an info response, taken from its first `[...]` token.
///
/// ```
/// use gsv_remote::commands::parse_version;
///
/// let version = parse_version("Welcome to Pal Server[v0.1.5.1] Default Palworld Server").unwrap();
/// assert_eq!(version.parts(), &[0, 1, 5, 1]);
/// ```
pub fn parse_version(response: &str) -> Option<ServerVersion> {
    let start = response.find('[')? + 1;
    let len = response[start..].find(']')?;
    response[start..start + len].parse().ok()
}
