use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

const BIN_DIR: &str = "bin";
const CONF_DIR: &str = "conf";
const DATA_DIR: &str = "data";
const WORK_DIR: &str = "work";
const LOGS_DIR: &str = "logs";
const ARCHIVE_DIR: &str = "archive";
const HOME_ENV: &str = "BATCH_NODE_HOME";

pub fn install_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if home.trim().is_empty() {
            return Err(AppError::BadRequest(
                "BATCH_NODE_HOME is set but empty".to_string(),
            ));
        }
        return Ok(PathBuf::from(home));
    }

    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path.parent().ok_or_else(|| {
        AppError::InvalidState("Failed to resolve executable directory".to_string())
    })?;

    if exe_dir.file_name().and_then(|name| name.to_str()) == Some(BIN_DIR) {
        let root = exe_dir.parent().ok_or_else(|| {
            AppError::InvalidState("Failed to resolve install root from bin".to_string())
        })?;
        return Ok(root.to_path_buf());
    }

    Ok(exe_dir.to_path_buf())
}

pub fn conf_dir() -> Result<PathBuf> {
    Ok(install_root()?.join(CONF_DIR))
}

pub fn data_dir() -> Result<PathBuf> {
    Ok(install_root()?.join(DATA_DIR))
}

/// Directories every on-disk artifact of a command lives under.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub work_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl DataLayout {
    pub fn under(data_dir: &Path) -> Self {
        Self {
            work_dir: data_dir.join(WORK_DIR),
            logs_dir: data_dir.join(LOGS_DIR),
            archive_dir: data_dir.join(ARCHIVE_DIR),
        }
    }

    pub fn create_all(&self) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        std::fs::create_dir_all(&self.archive_dir)?;
        Ok(())
    }
}

/// Per-command working area; the fork is cloned below it as `<fork_owner>/<repo>`.
pub fn command_work_dir(work_dir: &Path, owner: &str, repo: &str, command: &str) -> PathBuf {
    work_dir.join(owner).join(repo).join(command)
}

/// `<logs>/<owner>/<repo>/<id>.<kind>.log`, one file per log kind.
pub fn command_log_file(
    logs_dir: &Path,
    owner: &str,
    repo: &str,
    command_id: &str,
    kind: &str,
) -> PathBuf {
    logs_dir
        .join(owner)
        .join(repo)
        .join(format!("{}.{}.log", command_id, kind))
}

pub fn command_archive_file(
    archive_dir: &Path,
    owner: &str,
    repo: &str,
    command: &str,
) -> PathBuf {
    archive_dir
        .join(owner)
        .join(repo)
        .join(format!("{}.{}.{}.zip", owner, repo, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_paths_are_derived_from_owner_repo_and_id() {
        let layout = DataLayout::under(Path::new("/srv/batch"));

        assert_eq!(
            command_log_file(&layout.logs_dir, "octo", "hello", "42", "audit"),
            PathBuf::from("/srv/batch/logs/octo/hello/42.audit.log")
        );
        assert_eq!(
            command_work_dir(&layout.work_dir, "octo", "hello", "check"),
            PathBuf::from("/srv/batch/work/octo/hello/check")
        );
        assert_eq!(
            command_archive_file(&layout.archive_dir, "octo", "hello", "check"),
            PathBuf::from("/srv/batch/archive/octo/hello/octo.hello.check.zip")
        );
    }
}
