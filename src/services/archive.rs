use crate::error::{AppError, Result};
use crate::models::Command;
use crate::paths;
use async_trait::async_trait;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

/// Snapshots a command's working directory before it is discarded.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Where the command's archive lives, whether or not it exists yet.
    fn archive_path(&self, command: &Command) -> PathBuf;

    /// Returns the archive path, or `None` when there was nothing to archive.
    async fn archive(&self, command: &Command, source_dir: &Path) -> Result<Option<PathBuf>>;
}

pub struct ZipArchiver {
    archive_dir: PathBuf,
}

impl ZipArchiver {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    fn write_zip(source_dir: &Path, target: &Path, root_name: &str) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(target)?;
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        let mut pending = vec![source_dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let relative = path
                    .strip_prefix(source_dir)
                    .map_err(|e| AppError::Archive(e.to_string()))?;
                let name = format!(
                    "{}/{}",
                    root_name,
                    relative.to_string_lossy().replace('\\', "/")
                );

                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    writer
                        .add_directory(format!("{}/", name), options)
                        .map_err(|e| AppError::Archive(e.to_string()))?;
                    pending.push(path);
                } else if file_type.is_file() {
                    writer
                        .start_file(name, options)
                        .map_err(|e| AppError::Archive(e.to_string()))?;
                    let mut buffer = Vec::new();
                    fs::File::open(&path)?.read_to_end(&mut buffer)?;
                    writer.write_all(&buffer)?;
                }
            }
        }

        writer
            .finish()
            .map_err(|e| AppError::Archive(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    fn archive_path(&self, command: &Command) -> PathBuf {
        paths::command_archive_file(
            &self.archive_dir,
            &command.repo.owner,
            &command.repo.name,
            &command.command,
        )
    }

    async fn archive(&self, command: &Command, source_dir: &Path) -> Result<Option<PathBuf>> {
        if !source_dir.is_dir() {
            return Ok(None);
        }

        let target = self.archive_path(command);
        let root_name = format!("{}_{}", command.repo.owner, command.repo.name);
        let source = source_dir.to_path_buf();
        let zip_target = target.clone();

        tokio::task::spawn_blocking(move || Self::write_zip(&source, &zip_target, &root_name))
            .await
            .map_err(|e| AppError::Archive(format!("archive task failed: {}", e)))??;

        tracing::info!(command_id = %command.id, "archived {} to {}", source_dir.display(), target.display());
        Ok(Some(target))
    }
}
