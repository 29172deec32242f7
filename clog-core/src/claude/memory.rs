//! Project memory notes
//!
//! The assistant keeps per-project notes as markdown files in
//! `<project data dir>/memory/`. `MEMORY.md` is the entry point and is
//! listed first.

use crate::error::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Name of the main memory file, matched case-insensitively
pub const MAIN_MEMORY_FILE: &str = "MEMORY.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryFile {
    /// File name, e.g. `MEMORY.md`
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

/// Memory files of a project: `MEMORY.md` first, then other `.md` files by
/// name. Fails if the memory directory cannot be read; unreadable files are
/// skipped.
pub fn load_memory(data_dir: &Path) -> Result<Vec<MemoryFile>> {
    let dir = data_dir.join("memory");
    let mut main = Vec::new();
    let mut others = Vec::new();

    for entry in std::fs::read_dir(&dir)?.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() || !name.ends_with(".md") {
            continue;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable memory file");
                continue;
            }
        };

        let file = MemoryFile {
            name,
            path,
            content,
        };
        if file.name.eq_ignore_ascii_case(MAIN_MEMORY_FILE) {
            main.push(file);
        } else {
            others.push(file);
        }
    }

    others.sort_by(|a, b| a.name.cmp(&b.name));
    main.extend(others);
    Ok(main)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_main_file_first_then_by_name() {
        let dir = TempDir::new().unwrap();
        let memory = dir.path().join("memory");
        fs::create_dir_all(memory.join("archive")).unwrap();
        fs::write(memory.join("zeta.md"), "z").unwrap();
        fs::write(memory.join("alpha.md"), "a").unwrap();
        fs::write(memory.join("memory.md"), "# Index").unwrap();
        fs::write(memory.join("notes.txt"), "skip").unwrap();
        fs::write(memory.join("archive/old.md"), "skip").unwrap();

        let files = load_memory(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["memory.md", "alpha.md", "zeta.md"]);
        assert_eq!(files[0].content, "# Index");
        assert_eq!(files[1].path, memory.join("alpha.md"));
    }

    #[test]
    fn test_missing_memory_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let err = load_memory(dir.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
