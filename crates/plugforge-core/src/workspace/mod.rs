//! Working-copy management: scaffold creation and the version-control
//! baseline.
//!
//! Each pipeline run owns one isolated working copy in a private temporary
//! directory. The scaffold comes from a template-instantiation command when
//! that works, and from a minimal fixed structure otherwise; either way the
//! result is committed to a fresh local git repository so later
//! regeneration prompts have a recovery/diff baseline.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::exec::{self, CommandSpec};

/// Isolated, version-controlled directory owned by a single pipeline run.
///
/// Dropping the working copy abandons it (the temp directory is removed);
/// the publisher copies it out before that on success.
#[derive(Debug)]
pub struct WorkingCopy {
    /// Keeps the temp directory alive for the lifetime of the run.
    _temp: TempDir,
    root: PathBuf,
}

impl WorkingCopy {
    /// Directory the generator, gates, and publisher operate on.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Concatenated listing of the working copy's source files for the
    /// readiness review, truncated to `limit_bytes`.
    ///
    /// Skips version-control metadata, dependency caches, build output, and
    /// lockfiles; skips anything that is not valid UTF-8.
    pub fn source_listing(&self, limit_bytes: usize) -> Result<String> {
        let mut files = Vec::new();
        collect_source_files(&self.root, &self.root, &mut files)?;
        files.sort();

        let mut listing = String::new();
        for rel in files {
            let contents = match fs::read_to_string(self.root.join(&rel)) {
                Ok(contents) => contents,
                Err(_) => continue, // binary or unreadable
            };
            listing.push_str(&format!("--- {} ---\n{contents}\n", rel.display()));
        }
        Ok(exec::truncate_bytes(listing, limit_bytes))
    }
}

/// Directory names excluded from the review listing and the published
/// artifact.
pub const EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "dist", ".plugforge"];

const EXCLUDED_FILES: &[&str] = &["package-lock.json", "bun.lock", "bun.lockb", "yarn.lock"];

fn collect_source_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if EXCLUDED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_source_files(root, &path, out)?;
        } else {
            if EXCLUDED_FILES.contains(&name.as_ref()) {
                continue;
            }
            out.push(path.strip_prefix(root)?.to_path_buf());
        }
    }
    Ok(())
}

/// Create the working copy for `plugin_name`.
///
/// Runs `template` (with the plugin name appended) inside a fresh temp
/// directory; if the command fails, times out, or produces no plugin
/// directory, falls back to writing the minimal fixed structure. Ends by
/// initializing git and committing the baseline.
pub async fn initialize(
    plugin_name: &str,
    template: &CommandSpec,
    template_timeout: Duration,
) -> Result<WorkingCopy, PipelineError> {
    let temp = TempDir::with_prefix("plugforge-")
        .context("create temporary working area")
        .map_err(PipelineError::ScaffoldFailed)?;
    let root = temp.path().join(plugin_name);

    match run_template(plugin_name, template, temp.path(), template_timeout).await {
        Ok(()) if root.is_dir() => {
            info!(path = %root.display(), "scaffold created from template");
        }
        Ok(()) => {
            warn!("template command succeeded but produced no plugin directory, using fallback scaffold");
            write_fallback_scaffold(&root, plugin_name).map_err(PipelineError::ScaffoldFailed)?;
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "template command failed, using fallback scaffold");
            write_fallback_scaffold(&root, plugin_name).map_err(PipelineError::ScaffoldFailed)?;
        }
    }

    init_baseline(&root).map_err(PipelineError::ScaffoldFailed)?;
    Ok(WorkingCopy { _temp: temp, root })
}

async fn run_template(
    plugin_name: &str,
    template: &CommandSpec,
    parent: &Path,
    timeout: Duration,
) -> Result<()> {
    let mut spec = template.clone();
    spec.args.push(plugin_name.to_owned());
    debug!(command = %spec.display(), "running template command");

    let output = exec::run_with_timeout(&spec, parent, timeout).await?;
    if !output.success() {
        bail!(
            "template command {} failed (exit {:?}): {}",
            spec.display(),
            output.exit_code,
            output.stderr.trim()
        );
    }
    Ok(())
}

/// Write the minimal fixed structure: manifest, source entry point, and
/// build/test configuration.
fn write_fallback_scaffold(root: &Path, plugin_name: &str) -> Result<()> {
    fs::create_dir_all(root.join("src"))
        .with_context(|| format!("create scaffold dirs under {}", root.display()))?;

    let package_json = format!(
        r#"{{
  "name": "plugin-{plugin_name}",
  "version": "0.1.0",
  "type": "module",
  "main": "dist/index.js",
  "scripts": {{
    "build": "tsc",
    "test": "vitest run"
  }},
  "devDependencies": {{
    "typescript": "^5.4.0",
    "vitest": "^1.6.0"
  }}
}}
"#
    );

    let index_ts = format!(
        r#"export const plugin = {{
  name: "{plugin_name}",
  description: "Generated plugin scaffold.",
  actions: [],
  providers: [],
  evaluators: [],
  services: [],
}};

export default plugin;
"#
    );

    const TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "ES2022",
    "module": "ESNext",
    "moduleResolution": "bundler",
    "outDir": "dist",
    "strict": true,
    "declaration": true
  },
  "include": ["src"]
}
"#;

    const VITEST_CONFIG: &str = r#"import { defineConfig } from "vitest/config";

export default defineConfig({
  test: { include: ["src/**/*.test.ts"] },
});
"#;

    fs::write(root.join("package.json"), package_json).context("write package.json")?;
    fs::write(root.join("src/index.ts"), index_ts).context("write src/index.ts")?;
    fs::write(root.join("tsconfig.json"), TSCONFIG).context("write tsconfig.json")?;
    fs::write(root.join("vitest.config.ts"), VITEST_CONFIG).context("write vitest.config.ts")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Git baseline
// ---------------------------------------------------------------------------

/// Initialize a local repository in the working copy and commit the
/// scaffold as the recovery baseline. Never pushed or branched.
fn init_baseline(root: &Path) -> Result<()> {
    run_git(root, &["init", "--quiet"])?;
    // Local identity so commits work on hosts without global git config.
    run_git(root, &["config", "user.email", "plugforge@localhost"])?;
    run_git(root, &["config", "user.name", "plugforge"])?;
    run_git(root, &["add", "-A"])?;
    run_git(root, &["commit", "--quiet", "-m", "plugforge: scaffold baseline"])?;
    Ok(())
}

/// Commit any pending working-copy changes as a recovery checkpoint.
///
/// Returns `Ok(true)` if a commit was created, `Ok(false)` if the tree was
/// clean.
pub fn commit_checkpoint(root: &Path, message: &str) -> Result<bool> {
    run_git(root, &["add", "-A"])?;

    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(root)
        .output()
        .context("run git status")?;
    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        return Ok(false);
    }

    run_git(root, &["commit", "--quiet", "-m", message])?;
    Ok(true)
}

fn run_git(root: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("run git {}", args.join(" ")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_template() -> CommandSpec {
        CommandSpec::new("false", &[])
    }

    #[tokio::test]
    async fn fallback_scaffold_has_manifest_entry_point_and_baseline() {
        let copy = initialize("weather", &failing_template(), Duration::from_secs(5))
            .await
            .expect("scaffold should fall back");

        assert!(copy.path().join("package.json").is_file());
        assert!(copy.path().join("src/index.ts").is_file());
        assert!(copy.path().join("tsconfig.json").is_file());
        assert!(copy.path().join("vitest.config.ts").is_file());
        assert!(copy.path().join(".git").is_dir());

        let manifest = fs::read_to_string(copy.path().join("package.json")).unwrap();
        assert!(manifest.contains("plugin-weather"));
    }

    #[tokio::test]
    async fn template_output_is_used_when_it_creates_the_directory() {
        // A template "command" that creates the plugin directory itself.
        let template = CommandSpec::new("sh", &["-c", "mkdir \"$0\" && echo custom > \"$0/MARKER\"", ]);
        let copy = initialize("custom-plugin", &template, Duration::from_secs(5))
            .await
            .expect("template scaffold");
        assert!(copy.path().join("MARKER").is_file());
        // Fallback files were not written.
        assert!(!copy.path().join("tsconfig.json").exists());
    }

    #[tokio::test]
    async fn checkpoint_commit_reports_clean_tree() {
        let copy = initialize("weather", &failing_template(), Duration::from_secs(5))
            .await
            .expect("scaffold");

        // Baseline just committed, nothing pending.
        assert!(!commit_checkpoint(copy.path(), "noop").unwrap());

        fs::write(copy.path().join("src/extra.ts"), "export {};\n").unwrap();
        assert!(commit_checkpoint(copy.path(), "plugforge: checkpoint").unwrap());
        assert!(!commit_checkpoint(copy.path(), "noop again").unwrap());
    }

    #[tokio::test]
    async fn source_listing_skips_caches_and_lockfiles() {
        let copy = initialize("weather", &failing_template(), Duration::from_secs(5))
            .await
            .expect("scaffold");

        fs::create_dir_all(copy.path().join("node_modules/dep")).unwrap();
        fs::write(copy.path().join("node_modules/dep/index.js"), "junk").unwrap();
        fs::write(copy.path().join("package-lock.json"), "{}").unwrap();

        let listing = copy.source_listing(1_000_000).unwrap();
        assert!(listing.contains("--- src/index.ts ---"));
        assert!(listing.contains("--- package.json ---"));
        assert!(!listing.contains("node_modules"));
        assert!(!listing.contains("package-lock.json"));
    }

    #[tokio::test]
    async fn source_listing_is_truncated_to_limit() {
        let copy = initialize("weather", &failing_template(), Duration::from_secs(5))
            .await
            .expect("scaffold");
        let listing = copy.source_listing(64).unwrap();
        assert!(listing.contains("[truncated"));
    }
}
