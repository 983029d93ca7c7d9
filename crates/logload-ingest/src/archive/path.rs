//! Destination path construction

/// Join an archive entry name onto the source object path.
///
/// Repeated `/` collapse and `.` segments drop. `..` resolves inside the entry
/// name but can never climb above `prefix`. Returns `None` when the entry
/// name cleans down to nothing.
///
/// ```
/// use logload_ingest::archive::path::join_entry_path;
///
/// assert_eq!(join_entry_path("src.zip", "a/b.csv").as_deref(), Some("src.zip/a/b.csv"));
/// assert_eq!(join_entry_path("src.zip", "../../etc/x").as_deref(), Some("src.zip/etc/x"));
/// ```
pub fn join_entry_path(prefix: &str, name: &str) -> Option<String> {
    let name = clean_segments(name);
    if name.is_empty() {
        return None;
    }
    let mut segments = clean_segments(prefix);
    segments.extend(name);
    Some(segments.join("/"))
}

fn clean_segments(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop();
            },
            s => segments.push(s),
        }
    }
    segments
}
