// Internal utilities for documentation tests
// Sessions backed by in-memory buffers instead of a running engine

use std::io::Cursor;

use crate::process::{AvgQ, AvgQConfig};

/// In-memory session type used by doctests
pub type ScriptedSession = AvgQ<Vec<u8>, Cursor<Vec<u8>>>;

/// Creates a session whose engine answers the next script with `lines`
/// followed by the sentinel
pub fn scripted_session(lines: &[&str]) -> ScriptedSession {
    let config = AvgQConfig::default();
    let mut response = String::new();
    for line in lines {
        response.push_str(line);
        response.push('\n');
    }
    response.push_str(&config.endstring);
    response.push('\n');
    AvgQ::from_streams(Vec::new(), Cursor::new(response.into_bytes()), config)
}

/// Everything written to a scripted session so far
pub fn sent_script(session: &ScriptedSession) -> String {
    session
        .input()
        .map(|input| String::from_utf8_lossy(input).into_owned())
        .unwrap_or_default()
}
