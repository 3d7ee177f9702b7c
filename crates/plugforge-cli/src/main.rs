mod config;
mod create_cmd;
mod doctor_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "plugforge", about = "Generate and validate runtime plugins with an LLM coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a plugforge config file with the default settings
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Generate a plugin and validate it through the build/test/review loops
    Create {
        /// Plugin name (lowercase alphanumerics and hyphens)
        name: Option<String>,
        /// One-paragraph plugin description
        #[arg(long)]
        description: Option<String>,
        /// Feature the plugin should have (repeatable)
        #[arg(long = "feature")]
        features: Vec<String>,
        /// Action the plugin should expose (repeatable)
        #[arg(long = "action")]
        actions: Vec<String>,
        /// Provider the plugin should expose (repeatable)
        #[arg(long = "provider")]
        providers: Vec<String>,
        /// Evaluator the plugin should expose (repeatable)
        #[arg(long = "evaluator")]
        evaluators: Vec<String>,
        /// Background service the plugin should expose (repeatable)
        #[arg(long = "service")]
        services: Vec<String>,
        /// Read the whole specification from a TOML file instead of flags
        #[arg(long, conflicts_with_all = ["name", "description"])]
        spec: Option<PathBuf>,
        /// Directory the finished plugin is published into
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// Generator program override
        #[arg(long)]
        generator: Option<String>,
        /// Per-invocation generator timeout in seconds
        #[arg(long)]
        generation_timeout: Option<u64>,
        /// Maximum build attempts
        #[arg(long)]
        build_cap: Option<u32>,
        /// Maximum test attempts
        #[arg(long)]
        test_cap: Option<u32>,
        /// Maximum readiness review attempts
        #[arg(long)]
        revision_cap: Option<u32>,
    },
    /// Check that the environment can run a pipeline
    Doctor,
}

/// Execute the `plugforge init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    config::save_config(&config::ConfigFile::default())?;

    println!("Config written to {}", path.display());
    println!("Edit it to change the generator command, scaffold template, or iteration caps.");
    Ok(())
}

/// Hook for uncaught faults: log the panic and exit non-zero instead of
/// leaving a half-finished run with only a raw backtrace on stderr.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(%info, "fatal internal error");
        eprintln!("plugforge: fatal internal error: {info}");
        std::process::exit(1);
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    install_panic_hook();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => cmd_init(force),
        Commands::Create {
            name,
            description,
            features,
            actions,
            providers,
            evaluators,
            services,
            spec,
            output,
            generator,
            generation_timeout,
            build_cap,
            test_cap,
            revision_cap,
        } => {
            let args = create_cmd::CreateArgs {
                name,
                description,
                features,
                actions,
                providers,
                evaluators,
                services,
                spec_file: spec,
            };
            let overrides = config::Overrides {
                generator,
                generation_timeout_secs: generation_timeout,
                build_cap,
                test_cap,
                revision_cap,
                output_dir: Some(output),
            };
            create_cmd::run(args, overrides).await
        }
        Commands::Doctor => doctor_cmd::run().await,
    }
}
