//! Utility functions for replistore

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Percent-encoding set for file names (includes /, %, and control chars)
const NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b' ')
    .add(b':')
    .add(b'?')
    .add(b'*');

/// Encode a file name for filesystem usage
pub fn encode_name(name: &str) -> String {
    let encoded = utf8_percent_encode(name, NAME_ENCODE_SET).to_string();
    // "." and ".." must never address a directory
    match encoded.as_str() {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => encoded,
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Validate a file name: one non-empty protocol token.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::Malformed("file name cannot be empty".into()));
    }

    if name.len() > 1024 {
        return Err(crate::Error::Malformed(
            "file name too long (max 1024 bytes)".into(),
        ));
    }

    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(crate::Error::Malformed(
            "file name contains whitespace or control characters".into(),
        ));
    }

    Ok(())
}

/// Resolve a worker address token as handed out by the coordinator.
///
/// Workers advertise either a bare port, which lives on the coordinator's
/// host, or a full `host:port`.
pub fn resolve_worker_addr(token: &str, coordinator_addr: &str) -> String {
    if token.parse::<u16>().is_ok() {
        let host = coordinator_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("127.0.0.1");
        let host = match host {
            "" | "0.0.0.0" => "127.0.0.1",
            "[::]" => "[::1]",
            other => other,
        };
        format!("{}:{}", host, token)
    } else {
        token.to_string()
    }
}
