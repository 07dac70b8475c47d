//! Stackwire - a compose-style deployment planner
//!
//! This is the main CLI entry point for Stackwire.

use clap::{Parser, Subcommand};
use stackwire::compose::{
    ComposeOrchestrator, DeploymentPlan, Project, ProjectOptions, ServiceOutcome,
};
use stackwire::container::ContainerManager;
use stackwire::error::Result;
use stackwire::network::{NetworkManager, PortRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stackwire - compose descriptor validation, planning and startup
#[derive(Parser)]
#[command(name = "stackwire")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Validate, plan and start multi-service compose projects", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file(s), applied in order
    #[arg(short, long, global = true)]
    file: Vec<PathBuf>,

    /// Project directory
    #[arg(long, global = true)]
    project_directory: Option<PathBuf>,

    /// Project name
    #[arg(short = 'p', long, global = true)]
    project_name: Option<String>,

    /// Env file used for interpolation
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and print the normalized descriptor
    Config {
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Print the service start order
    Order,

    /// Print the deployment plan
    Plan {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Create networks and start services in dependency order
    Up,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut options = ProjectOptions::from_env(std::env::current_dir()?);
    options.files = cli.file;
    options.project_directory = cli.project_directory;
    options.project_name = cli.project_name;
    options.env_file = cli.env_file;

    let project = Project::load(&options)?;

    match cli.command {
        Commands::Config { json } => {
            let warnings = stackwire::compose::ComposeParser::validate(&project.config)?;
            for warning in warnings {
                eprintln!("Warning: {}", warning);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&project.config)?);
            } else {
                print!("{}", serde_yaml::to_string(&project.config)?);
            }
        }

        Commands::Order => {
            let plan = DeploymentPlan::build(&project)?;
            for service in &plan.start_order {
                println!("{}", service);
            }
        }

        Commands::Plan { json } => {
            let plan = DeploymentPlan::build(&project)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }

        Commands::Up => {
            let plan = DeploymentPlan::build(&project)?;
            for warning in &plan.warnings {
                eprintln!("Warning: {}", warning);
            }

            let mut orchestrator = ComposeOrchestrator::new(
                plan,
                Arc::new(ContainerManager::new()),
                Arc::new(NetworkManager::new()?),
                Arc::new(PortRegistry::new()),
            );

            let report = orchestrator.up().await?;
            for network in &report.created_networks {
                println!("Network {}  Created", network);
            }
            for (service, outcome) in &report.services {
                match outcome {
                    ServiceOutcome::Started { container_id } => {
                        println!("Service {}  Started ({})", service, container_id)
                    }
                    ServiceOutcome::Failed { reason } => {
                        println!("Service {}  Failed: {}", service, reason)
                    }
                    ServiceOutcome::Skipped { dependency } => {
                        println!("Service {}  Skipped: {} did not start", service, dependency)
                    }
                }
            }

            println!();
            println!("{:<20} {:<30} {:<10} {}", "SERVICE", "CONTAINER", "STATUS", "ADDRESSES");
            for status in orchestrator.status()? {
                let state = status
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let addresses: Vec<String> = status
                    .addresses
                    .iter()
                    .map(|(network, ip)| format!("{}={}", network, ip))
                    .collect();
                println!(
                    "{:<20} {:<30} {:<10} {}",
                    status.name,
                    status.container_name,
                    state,
                    addresses.join(",")
                );
            }

            if !report.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_plan(plan: &DeploymentPlan) {
    println!("Project: {} ({})", plan.project, plan.directory.display());
    println!("Start order: {}", plan.start_order.join(" -> "));

    println!();
    println!("Networks:");
    for network in &plan.networks {
        let external = if network.external { " external" } else { "" };
        println!(
            "  {:<24} {:<8}{} members: {}",
            network.name,
            network.driver,
            external,
            network.members.join(", ")
        );
    }

    println!();
    println!("Services:");
    for name in &plan.start_order {
        let Some(service) = plan.services.get(name) else {
            continue;
        };

        println!("  {} ({})", service.name, service.container_name);
        println!("    image: {}", service.image);
        if let Some(build) = &service.build {
            println!("    build: {}", build.context.display());
        }
        for port in &service.ports {
            println!("    port: {}", port);
        }
        for (dependency, condition) in &service.depends_on {
            println!("    after: {} ({})", dependency, condition);
        }
    }

    for warning in &plan.warnings {
        println!("Warning: {}", warning);
    }
}
