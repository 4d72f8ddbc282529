use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use eks_provisioner_core::{
    build_trust_policy, declare_stack, provision_role, serialize_trust_policy, AwsIamEngine,
    ConfigError, InMemoryEngine, ProvisionerConfig, ProvisioningContext,
};
use log::{info, LevelFilter};

mod output;

#[derive(Parser, Debug)]
#[command(
    name = "eks-provisioner",
    version,
    about = "Provision an EKS cluster role and declare its network, cluster and bucket"
)]
struct Cli {
    /// Increase log verbosity (-v for info, -vv for debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML configuration file; built-in defaults are used when omitted
    #[arg(long, env = "EKS_PROVISIONER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Declare the full stack against an in-memory engine and print every intent (dry run)
    Plan {
        #[command(flatten)]
        role: RoleOverrides,

        #[arg(long = "output", value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the trust policy document of the cluster role
    TrustPolicy {
        #[command(flatten)]
        role: RoleOverrides,
    },
    /// Create or update the cluster role and its policy attachments in AWS IAM
    ProvisionRole {
        #[command(flatten)]
        role: RoleOverrides,
    },
}

#[derive(Args, Debug)]
struct RoleOverrides {
    /// Name of the cluster role
    #[arg(long)]
    role_name: Option<String>,

    /// Service principal allowed to assume the role
    #[arg(long)]
    service_principal: Option<String>,

    /// Managed policy ARN to attach; repeat to attach several, in order.
    /// Replaces the configured list.
    #[arg(long = "policy-arn")]
    policy_arns: Vec<String>,
}

impl RoleOverrides {
    fn apply(self, config: &mut ProvisionerConfig) {
        if let Some(name) = self.role_name {
            config.role.name = name;
        }
        if let Some(principal) = self.service_principal {
            config.role.service_principal = principal;
        }
        if !self.policy_arns.is_empty() {
            config.role.managed_policy_arns = self.policy_arns;
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Load the configuration file (or defaults), apply flag overrides, then validate
fn load_config(path: Option<&Path>, overrides: RoleOverrides) -> Result<ProvisionerConfig> {
    let mut config = match path {
        Some(path) => ProvisionerConfig::from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ProvisionerConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Plan { role, format } => {
            let config = load_config(config_path, role)?;
            let engine = InMemoryEngine::new();
            let mut ctx = ProvisioningContext::new(&engine);
            let outputs = declare_stack(&mut ctx, &config)
                .await
                .context("Failed to plan stack")?;
            let intents = engine.intents();
            match format {
                OutputFormat::Text => print!("{}", output::render_plan_text(&intents, &outputs)),
                OutputFormat::Json => {
                    println!("{}", output::render_plan_json(&intents, &outputs)?);
                }
            }
        }
        Commands::TrustPolicy { role } => {
            let config = load_config(config_path, role)?;
            let document = build_trust_policy(&config.role.service_principal);
            println!("{}", serialize_trust_policy(&document)?);
        }
        Commands::ProvisionRole { role } => {
            let config = load_config(config_path, role)?;
            let engine = AwsIamEngine::from_env().await;
            let identity = engine
                .caller_identity()
                .await
                .context("Failed to resolve the AWS account to provision into")?;
            info!(
                "Provisioning role '{}' in account {} as {}",
                config.role.name, identity.account, identity.arn
            );

            let mut ctx = ProvisioningContext::new(&engine);
            let role = provision_role(
                &mut ctx,
                &config.role.name,
                &config.role.service_principal,
                &config.role.managed_policy_arns,
            )
            .await
            .with_context(|| format!("Failed to provision role '{}'", config.role.name))?;
            println!("{}", serde_json::to_string_pretty(&role)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
