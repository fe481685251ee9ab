//! Reports the tool leaves in the working copy under `build/batchai`.

use crate::error::{AppError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Check,
    Test,
}

impl ReportKind {
    pub fn file_suffix(self) -> &'static str {
        match self {
            ReportKind::Check => ".check.batchai.json",
            ReportKind::Test => ".test.batchai.json",
        }
    }
}

pub fn reports_dir(repo_dir: &Path) -> PathBuf {
    repo_dir.join("build").join("batchai")
}

/// Loads every report of `kind` below `dir`, ordered by path. Check reports
/// without issues are dropped. A missing directory yields no reports.
pub async fn load_reports(dir: &Path, kind: ReportKind) -> Result<Vec<Value>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || load_reports_blocking(&dir, kind))
        .await
        .map_err(|e| AppError::InvalidState(format!("report task failed: {}", e)))?
}

fn load_reports_blocking(dir: &Path, kind: ReportKind) -> Result<Vec<Value>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(kind.file_suffix()))
            {
                files.push(path);
            }
        }
    }
    files.sort();

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        let report: Value = match serde_json::from_str(&content) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Skipping malformed report {}: {}", file.display(), e);
                continue;
            }
        };
        if kind == ReportKind::Check
            && report.get("has_issue").and_then(Value::as_bool) != Some(true)
        {
            continue;
        }
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn check_reports_keep_only_files_with_issues() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs.check.batchai.json", r#"{"has_issue": true, "path": "src/a.rs"}"#);
        write(dir.path(), "src/b.rs.check.batchai.json", r#"{"has_issue": false, "path": "src/b.rs"}"#);
        write(dir.path(), "src/a.rs.test.batchai.json", r#"{"path": "src/a.rs"}"#);
        write(dir.path(), "src/c.rs.check.batchai.json", "{not json");

        let reports = load_reports(dir.path(), ReportKind::Check).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["path"], "src/a.rs");
    }

    #[tokio::test]
    async fn test_reports_are_ordered_by_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "z/z.rs.test.batchai.json", r#"{"path": "z"}"#);
        write(dir.path(), "a.rs.test.batchai.json", r#"{"path": "a"}"#);

        let reports = load_reports(dir.path(), ReportKind::Test).await.unwrap();

        let paths: Vec<_> = reports.iter().map(|r| r["path"].clone()).collect();
        assert_eq!(paths, vec!["a", "z"]);
    }

    #[tokio::test]
    async fn missing_directory_has_no_reports() {
        let dir = tempfile::tempdir().unwrap();
        let reports = load_reports(&dir.path().join("absent"), ReportKind::Test)
            .await
            .unwrap();
        assert!(reports.is_empty());
    }
}
