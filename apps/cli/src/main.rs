use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use clap::{ArgAction, Parser, Subcommand};
use funke_package::FhirPackage;
use funke_registry::StructureRegistry;
use funke_validator::{
    InMemoryTerminologyProvider, ValidationOutcome, Validator, ValidatorConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "funke",
    about = "FHIR conformance validator",
    version,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more resource instances (JSON) against loaded packages.
    Validate {
        /// Resource JSON files (or "-" for stdin).
        #[arg(required = true)]
        instances: Vec<PathBuf>,
        /// Unpacked conformance package directories. Repeatable.
        #[arg(short = 'p', long = "package", value_name = "DIR")]
        packages: Vec<PathBuf>,
        /// Validate against this profile URL instead of meta.profile.
        #[arg(long)]
        profile: Option<String>,
        /// Treat warnings as errors.
        #[arg(long, action = ArgAction::SetTrue)]
        strict: bool,
        /// Enable terminology (binding) validation using loaded ValueSets.
        #[arg(long, action = ArgAction::SetTrue)]
        terminology: bool,
        /// Stop after this many issues (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        max_issues: usize,
        /// YAML validator configuration file; flags override its values.
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
        /// Pretty-print the OperationOutcome JSON.
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Summarize the StructureDefinitions loaded from packages.
    Inspect {
        /// Unpacked conformance package directories. Repeatable.
        #[arg(short = 'p', long = "package", value_name = "DIR", required = true)]
        packages: Vec<PathBuf>,
    },

    /// Print CLI version.
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { packages } => {
            let loaded = load_packages(&packages)?;
            let registry = StructureRegistry::from_packages(&loaded);
            let mut urls: Vec<_> = registry
                .structure_definitions()
                .map(|sd| sd.url.clone())
                .collect();
            urls.sort();
            for url in &urls {
                println!("{url}");
            }
            println!("{} definitions", urls.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate {
            instances,
            packages,
            profile,
            strict,
            terminology,
            max_issues,
            config,
            pretty,
        } => {
            let mut cfg = match config {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    ValidatorConfig::from_yaml(&text)
                        .with_context(|| format!("invalid config {}", path.display()))?
                }
                None => ValidatorConfig::defaults(),
            };
            if strict {
                cfg.exec.strict_mode = true;
            }
            if max_issues > 0 {
                cfg.exec.max_issues = max_issues;
            }
            if terminology {
                cfg.terminology.enabled = true;
            }
            if profile.is_some() {
                cfg.profiles.profile_override = profile;
            }

            let loaded = load_packages(&packages)?;
            let registry = Arc::new(StructureRegistry::from_packages(&loaded));
            anyhow::ensure!(
                !registry.is_empty(),
                "no StructureDefinitions loaded; pass at least one --package directory"
            );

            let mut validator = Validator::from_config(&cfg, registry)?;
            if cfg.terminology.enabled {
                validator = validator.with_terminology(Arc::new(
                    InMemoryTerminologyProvider::with_cache_capacity(&loaded, cfg.caches.value_set),
                ));
            }

            let mut any_errors = false;
            for instance in &instances {
                let bytes = read_instance(instance)
                    .with_context(|| format!("failed to read {}", instance.display()))?;
                let outcome = validator.validate_bytes(&bytes);
                any_errors |= outcome.has_errors();
                print_outcome(instance, &outcome, pretty)?;
                validator.recycle(outcome);
            }

            Ok(if any_errors {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn load_packages(dirs: &[PathBuf]) -> Result<Vec<FhirPackage>> {
    let mut packages = Vec::new();
    for dir in dirs {
        let package = FhirPackage::from_dir(dir)
            .with_context(|| format!("failed to load package {}", dir.display()))?;
        tracing::info!(
            package = %package.manifest.name,
            resources = package.resources.len(),
            "loaded package"
        );
        packages.push(package);
    }
    Ok(packages)
}

fn read_instance(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buffer = Vec::new();
        std::io::stdin().read_to_end(&mut buffer)?;
        return Ok(buffer);
    }
    Ok(fs::read(path)?)
}

fn print_outcome(path: &Path, outcome: &ValidationOutcome, pretty: bool) -> Result<()> {
    let rendered = outcome.to_operation_outcome();
    let json = if pretty {
        serde_json::to_string_pretty(&rendered)?
    } else {
        serde_json::to_string(&rendered)?
    };
    eprintln!(
        "{}: {} ({} error(s), {} warning(s))",
        path.display(),
        if outcome.has_errors() { "INVALID" } else { "valid" },
        outcome.error_count(),
        outcome.warning_count()
    );
    println!("{json}");
    Ok(())
}
