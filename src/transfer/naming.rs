//! Paths and names derived from the source key

use crate::error::{Error, Result};

/// Directory inside the destination holding MySQL databases
pub const MYSQL_DATA_DIR: &str = "/var/lib/mysql";

/// Extension of the last path element including the dot, or "" when absent.
fn extension(path: &str) -> &str {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) => &path[name_start + dot..],
        None => "",
    }
}

/// `path` without the extension of its last element
pub fn strip_extension(path: &str) -> &str {
    &path[..path.len() - extension(path).len()]
}

/// Fixed path the source is staged at inside the destination
pub fn staging_path(bucket: &str, key: &str) -> String {
    format!("/tmp/{}/{}", bucket, key)
}

/// Parent directory of a staged path
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

/// Database name for a key: up to two extensions stripped, then every
/// `/`, `-` and `.` removed.
///
/// The name is interpolated into SQL, so anything outside `[A-Za-z0-9_$]`
/// is rejected.
pub fn load_target_name(key: &str) -> Result<String> {
    let name: String = strip_extension(strip_extension(key))
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '.'))
        .collect();

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(Error::validation(format!(
            "Key '{}' does not map to a valid database name (got '{}')",
            key, name
        )));
    }
    Ok(name)
}

/// Directory that exists once a database has been created
pub fn load_target_dir(target: &str) -> String {
    format!("{}/{}", MYSQL_DATA_DIR, target)
}
