//! The `plugforge doctor` command: run the same precondition checks the
//! pipeline runs, and report each one.

use anyhow::Result;

use plugforge_core::preflight;

use crate::config;

pub async fn run() -> Result<()> {
    let pipeline_config = config::resolve(&config::Overrides::default())?;
    let temp_area = std::env::temp_dir();
    let mut healthy = true;

    match preflight::check_disk_space(&temp_area, pipeline_config.required_disk_bytes) {
        Ok(()) => println!(
            "ok: {} has at least {} MiB free",
            temp_area.display(),
            pipeline_config.required_disk_bytes / (1024 * 1024)
        ),
        Err(err) => {
            println!("FAIL: {err}");
            healthy = false;
        }
    }

    match preflight::probe_generator(&pipeline_config.generator_command).await {
        Ok(()) => println!(
            "ok: generator `{}` answers a version probe",
            pipeline_config.generator_command.program
        ),
        Err(err) => {
            println!("FAIL: {err}");
            healthy = false;
        }
    }

    let template = &pipeline_config.template_command;
    match preflight::probe_generator(template).await {
        Ok(()) => println!("ok: scaffold template `{}` is available", template.program),
        Err(_) => println!(
            "warn: scaffold template `{}` not available; the built-in fallback scaffold will be used",
            template.program
        ),
    }

    if !healthy {
        std::process::exit(2);
    }
    println!("\nEnvironment looks ready. Defaults are in {}", config::config_path().display());
    Ok(())
}
