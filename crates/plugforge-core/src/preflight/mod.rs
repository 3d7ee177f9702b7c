//! Environment preconditions checked before any mutation occurs.
//!
//! Two checks, in order: the temporary-file area has enough free space for
//! a working copy (a plain statvfs query, no subprocess), then the
//! generator CLI answers a version probe. Both are fatal with no retry;
//! the pipeline must not have created anything yet when either fails.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::exec::{CommandSpec, run_with_timeout};

/// Timeout for the generator version probe. The probe prints a version
/// string and exits; anything slower than this is treated as broken.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Verify the generator CLI is invocable via a trivial `--version` probe.
pub async fn probe_generator(generator: &CommandSpec) -> Result<(), PipelineError> {
    let probe = CommandSpec::new(generator.program.clone(), &["--version"]);
    debug!(command = %probe.display(), "probing generator tool");

    let output = match run_with_timeout(&probe, Path::new("."), PROBE_TIMEOUT).await {
        Ok(output) => output,
        Err(e) => {
            return Err(PipelineError::ToolMissing {
                command: generator.program.clone(),
                reason: format!("{e:#}"),
            });
        }
    };

    if !output.success() {
        return Err(PipelineError::ToolMissing {
            command: generator.program.clone(),
            reason: format!(
                "version probe exited with status {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
        });
    }

    info!(version = %output.stdout.trim(), "generator tool available");
    Ok(())
}

/// Verify the temp area has at least `required_bytes` available.
pub fn check_disk_space(temp_area: &Path, required_bytes: u64) -> Result<(), PipelineError> {
    let available_bytes = available_bytes(temp_area)?;

    debug!(
        path = %temp_area.display(),
        available_bytes,
        required_bytes,
        "disk space probe"
    );

    if available_bytes < required_bytes {
        return Err(PipelineError::InsufficientDiskSpace {
            path: temp_area.to_path_buf(),
            available_bytes,
            required_bytes,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn available_bytes(path: &Path) -> Result<u64, PipelineError> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| PipelineError::Other(anyhow::Error::new(e).context("path for statvfs")))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is a valid NUL-terminated string and stat is a
    // zeroed out-param of the correct type.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return Err(PipelineError::Other(
            anyhow::Error::new(std::io::Error::last_os_error())
                .context(format!("statvfs {}", path.display())),
        ));
    }
    // Space available to unprivileged processes, not raw free space.
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Result<u64, PipelineError> {
    // No portable free-space query without another dependency; skip the
    // check rather than block the run.
    Ok(u64::MAX)
}

/// Run both precondition checks: disk space first (it spawns nothing),
/// then the tool probe.
pub async fn run_preflight(
    generator: &CommandSpec,
    temp_area: &Path,
    required_bytes: u64,
) -> Result<(), PipelineError> {
    check_disk_space(temp_area, required_bytes)?;
    probe_generator(generator).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_generator_is_tool_missing() {
        let generator = CommandSpec::new("plugforge-no-such-generator", &[]);
        let err = probe_generator(&generator).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn failing_probe_is_tool_missing() {
        // `false --version` exits non-zero, which the probe treats the same
        // as an uninvocable tool.
        let generator = CommandSpec::new("false", &[]);
        let err = probe_generator(&generator).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolMissing { .. }));
    }

    #[test]
    fn disk_space_check_passes_for_tiny_requirement() {
        check_disk_space(Path::new("/tmp"), 1).expect("1 byte should always be available");
    }

    #[test]
    fn disk_space_check_fails_for_absurd_requirement() {
        let err = check_disk_space(Path::new("/tmp"), u64::MAX).unwrap_err();
        match err {
            PipelineError::InsufficientDiskSpace {
                available_bytes,
                required_bytes,
                ..
            } => {
                assert!(available_bytes < required_bytes);
            }
            other => panic!("expected disk space error, got {other:?}"),
        }
    }

    #[test]
    fn nonexistent_path_is_an_error_not_a_pass() {
        let err = check_disk_space(Path::new("/definitely/not/a/real/path"), 1).unwrap_err();
        assert!(matches!(err, PipelineError::Other(_)));
    }
}
