//! Per-task report files
//!
//! Every completed task writes its full response to `<task_output_dir>/<id>.md`
//! and, when it carried a contract, a compression digest to
//! `<id>.compression.md`. Paths are recorded on the task relative to the project
//! root. Writes for the same task id overwrite.

use crate::error::{TeamError, TeamResult};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
    output_dir: PathBuf,
}

impl ReportStore {
    pub fn new<R: Into<PathBuf>, O: Into<PathBuf>>(root: R, output_dir: O) -> Self {
        Self {
            root: root.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the full response. Returns the root-relative path.
    pub fn write_output(&self, task_id: &str, content: &str) -> TeamResult<String> {
        self.write(&format!("{task_id}.md"), content)
    }

    /// Write the compression digest. Returns the root-relative path.
    pub fn write_compression(&self, task_id: &str, content: &str) -> TeamResult<String> {
        self.write(&format!("{task_id}.compression.md"), content)
    }

    /// Read a recorded path; `None` when it does not exist or cannot be read
    pub fn read(&self, recorded: &str) -> Option<String> {
        let recorded = recorded.trim();
        if recorded.is_empty() {
            return None;
        }
        fs::read_to_string(self.resolve(recorded)).ok()
    }

    pub fn resolve(&self, recorded: &str) -> PathBuf {
        let path = Path::new(recorded);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn write(&self, file_name: &str, content: &str) -> TeamResult<String> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| TeamError::report_io(&self.output_dir, e))?;
        let path = self.output_dir.join(file_name);
        fs::write(&path, format!("{}\n", content.trim()))
            .map_err(|e| TeamError::report_io(&path, e))?;
        Ok(self.relative(&path))
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_paths_are_root_relative() {
        let dir = TempDir::new().unwrap();
        let reports = ReportStore::new(dir.path(), dir.path().join("team/state/task_outputs"));

        let path = reports.write_output("TASK-0001", "\n  body  \n").unwrap();
        assert_eq!(path, "team/state/task_outputs/TASK-0001.md");
        assert_eq!(reports.read(&path).as_deref(), Some("body\n"));

        let path = reports.write_compression("TASK-0001", "digest").unwrap();
        assert_eq!(path, "team/state/task_outputs/TASK-0001.compression.md");
    }

    #[test]
    fn test_read_missing_or_blank_path() {
        let dir = TempDir::new().unwrap();
        let reports = ReportStore::new(dir.path(), dir.path().join("out"));
        assert_eq!(reports.read("out/nothing.md"), None);
        assert_eq!(reports.read("  "), None);
    }
}
