//! Line-oriented append-only files shared by the cache log, the resolution
//! table and the reference table.
//!
//! A line counts as committed only once its trailing newline is on disk, so a
//! run interrupted mid-write leaves a dangling fragment that the next reader
//! drops and the next writer truncates away.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Read every newline-terminated line of `path`. A missing file reads as empty.
pub fn read_committed_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let committed = match content.rfind('\n') {
        Some(end) => &content[..end],
        None => return Ok(Vec::new()),
    };
    Ok(committed
        .split('\n')
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Open `path` for appending, first cutting off any uncommitted tail.
pub fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).read(true).open(path)?;
    let content = std::fs::read(path)?;
    let committed_len = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    if committed_len < content.len() {
        tracing::warn!(
            "Dropping {} uncommitted bytes at the end of {}",
            content.len() - committed_len,
            path.display()
        );
        file.set_len(committed_len as u64)?;
    }
    Ok(file)
}

/// Append a single record and make it durable before returning.
pub fn append_line(file: &mut File, line: &str) -> io::Result<()> {
    debug_assert!(!line.contains('\n'));
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    file.flush()?;
    file.sync_data()
}

/// Replace `path` with `body` through a temporary file in the same directory.
pub fn write_atomic(path: &Path, body: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Flatten a free-text value into a single tab-free field.
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}
