//! The `plugforge create` command: assemble the specification, run the
//! pipeline, and map the outcome to an exit code.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::info;

use plugforge_core::error::PipelineError;
use plugforge_core::pipeline::Pipeline;
use plugforge_core::spec::PluginSpecification;

use crate::config::{self, Overrides};

pub struct CreateArgs {
    pub name: Option<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub actions: Vec<String>,
    pub providers: Vec<String>,
    pub evaluators: Vec<String>,
    pub services: Vec<String>,
    pub spec_file: Option<PathBuf>,
}

pub async fn run(args: CreateArgs, overrides: Overrides) -> Result<()> {
    let spec = build_spec(&args)?;
    let pipeline_config = config::resolve(&overrides)?;

    println!("Creating plugin `{}`", spec.name);
    let pipeline = Pipeline::new(pipeline_config);

    // First Ctrl-C cancels the run gracefully, second force-exits.
    let signal_task = pipeline.guard().install_signal_handler()?;
    let result = pipeline.run(&spec).await;
    signal_task.abort();

    match result {
        Ok(outcome) => {
            println!("\nPlugin published to {}", outcome.target.display());
            if let Some(backup) = &outcome.backup {
                println!("Previous directory moved to {}", backup.display());
            }
            println!(
                "Attempts: build {}, test {}, review {}",
                outcome.counters.build, outcome.counters.test, outcome.counters.revision
            );
            Ok(())
        }
        Err(
            err @ (PipelineError::ToolMissing { .. }
            | PipelineError::InsufficientDiskSpace { .. }),
        ) => {
            eprintln!("Precondition failed: {err}");
            std::process::exit(2);
        }
        Err(PipelineError::Interrupted) => {
            eprintln!("Interrupted.");
            std::process::exit(130);
        }
        Err(err) => {
            eprintln!("Pipeline failed: {err}");
            std::process::exit(1);
        }
    }
}

/// Build the immutable specification from a TOML file or from flags.
fn build_spec(args: &CreateArgs) -> Result<PluginSpecification> {
    let spec = if let Some(path) = &args.spec_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read specification file {}", path.display()))?;
        PluginSpecification::from_toml(&contents)
            .with_context(|| format!("parse specification file {}", path.display()))?
    } else {
        let Some(name) = args.name.clone() else {
            bail!("either a plugin name or --spec <file> is required");
        };
        let Some(description) = args.description.clone() else {
            bail!("--description is required when not using --spec");
        };
        let spec = PluginSpecification {
            name,
            description,
            features: args.features.clone(),
            actions: args.actions.clone(),
            providers: args.providers.clone(),
            evaluators: args.evaluators.clone(),
            services: args.services.clone(),
        };
        spec.validate()?;
        spec
    };
    info!(name = %spec.name, "specification assembled");
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag_args(name: &str, description: &str) -> CreateArgs {
        CreateArgs {
            name: Some(name.to_owned()),
            description: Some(description.to_owned()),
            features: vec!["caching".to_owned()],
            actions: vec![],
            providers: vec![],
            evaluators: vec![],
            services: vec![],
            spec_file: None,
        }
    }

    #[test]
    fn builds_spec_from_flags() {
        let spec = build_spec(&flag_args("weather", "Fetches weather")).unwrap();
        assert_eq!(spec.name, "weather");
        assert_eq!(spec.features, vec!["caching"]);
    }

    #[test]
    fn rejects_missing_name_and_description() {
        let mut args = flag_args("weather", "Fetches weather");
        args.name = None;
        assert!(build_spec(&args).is_err());

        let mut args = flag_args("weather", "Fetches weather");
        args.description = None;
        assert!(build_spec(&args).is_err());
    }

    #[test]
    fn rejects_invalid_slug() {
        let args = flag_args("Not A Slug", "desc");
        assert!(build_spec(&args).is_err());
    }

    #[test]
    fn builds_spec_from_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("spec.toml");
        std::fs::write(
            &path,
            r#"
            name = "weather"
            description = "Fetches weather data"
            features = ["current conditions"]
            actions = ["GET_WEATHER"]
            "#,
        )
        .unwrap();

        let args = CreateArgs {
            name: None,
            description: None,
            features: vec![],
            actions: vec![],
            providers: vec![],
            evaluators: vec![],
            services: vec![],
            spec_file: Some(path),
        };
        let spec = build_spec(&args).unwrap();
        assert_eq!(spec.name, "weather");
        assert_eq!(spec.actions, vec!["GET_WEATHER"]);
    }
}
