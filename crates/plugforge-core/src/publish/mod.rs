//! Copies a validated working copy out to the caller-visible target path.
//!
//! Publication is copy-only: the working copy stays intact until its
//! tempdir is dropped, and a pre-existing target directory is renamed
//! aside with a timestamp suffix, never deleted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Directories that stay behind: version-control metadata, dependency
/// caches, and pipeline-internal state.
const PUBLISH_EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", ".plugforge"];

/// What happened during publication.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub target: PathBuf,
    /// Where the previously existing target was moved, if there was one.
    pub backup: Option<PathBuf>,
}

/// Copy `working_root` to `target`, backing up any existing directory at
/// `target` first.
pub fn publish(working_root: &Path, target: &Path) -> Result<PublishReport, PipelineError> {
    publish_inner(working_root, target).map_err(|source| PipelineError::Publish {
        target: target.to_path_buf(),
        source,
    })
}

fn publish_inner(working_root: &Path, target: &Path) -> Result<PublishReport> {
    let backup = if target.exists() {
        let backup_path = backup_path_for(target)?;
        fs::rename(target, &backup_path)
            .with_context(|| format!("back up existing {}", target.display()))?;
        info!(backup = %backup_path.display(), "existing target moved aside");
        Some(backup_path)
    } else {
        None
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create parent of {}", target.display()))?;
    }
    copy_tree(working_root, target)?;
    info!(target = %target.display(), "artifact published");

    Ok(PublishReport {
        target: target.to_path_buf(),
        backup,
    })
}

/// `<target>.bak.<UTC timestamp>`, with a numeric suffix if two publishes
/// land within the same second.
fn backup_path_for(target: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let base = PathBuf::from(format!("{}.bak.{stamp}", target.display()));
    if !base.exists() {
        return Ok(base);
    }
    for n in 1..1000u32 {
        let candidate = PathBuf::from(format!("{}.{n}", base.display()));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    anyhow::bail!("could not find a free backup name for {}", target.display())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let file_type = entry.file_type()?;
        let from = entry.path();
        let to = dst.join(&name);

        if file_type.is_dir() {
            if PUBLISH_EXCLUDED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                debug!(dir = %from.display(), "skipping excluded directory");
                continue;
            }
            copy_tree(&from, &to)?;
        } else if file_type.is_file() {
            fs::copy(&from, &to)
                .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        }
        // Symlinks in a generated working copy are unexpected; skip them.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_working_copy(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("src/index.ts"), "export {};").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
    }

    #[test]
    fn copies_sources_and_skips_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        let target = tmp.path().join("out/my-plugin");
        fs::create_dir_all(&work).unwrap();
        seed_working_copy(&work);

        let report = publish(&work, &target).unwrap();
        assert!(report.backup.is_none());
        assert!(target.join("package.json").exists());
        assert!(target.join("src/index.ts").exists());
        assert!(!target.join(".git").exists());
        assert!(!target.join("node_modules").exists());
        // Source remains untouched.
        assert!(work.join("package.json").exists());
    }

    #[test]
    fn existing_target_is_renamed_not_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        let target = tmp.path().join("my-plugin");
        fs::create_dir_all(&work).unwrap();
        seed_working_copy(&work);
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("precious.txt"), "do not lose").unwrap();

        let report = publish(&work, &target).unwrap();
        let backup = report.backup.expect("backup path");
        assert!(backup.join("precious.txt").exists());
        assert_eq!(
            fs::read_to_string(backup.join("precious.txt")).unwrap(),
            "do not lose"
        );
        assert!(target.join("package.json").exists());
    }

    #[test]
    fn repeated_publishes_never_lose_a_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        let target = tmp.path().join("my-plugin");
        fs::create_dir_all(&work).unwrap();
        seed_working_copy(&work);

        publish(&work, &target).unwrap();
        let second = publish(&work, &target).unwrap();
        let third = publish(&work, &target).unwrap();

        let b2 = second.backup.expect("second backup");
        let b3 = third.backup.expect("third backup");
        assert_ne!(b2, b3, "same-second backups must not collide");
        assert!(b2.exists());
        assert!(b3.exists());
        assert!(target.exists());
    }
}
