//! Helpers for building remote shell commands

/// Quote a value for a POSIX shell (busybox `ash` included)
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Parent directory of an absolute remote path, if it has one besides `/`
pub fn remote_parent(path: &str) -> Option<&str> {
    let (parent, _) = path.trim_end_matches('/').rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}
