//! configcheck - validate agent configurations in ephemeral Kubernetes pods

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use configcheck_common::kube_utils::create_client;
use configcheck_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use configcheck_job::settings::DEFAULT_DEADLINE;
use configcheck_job::{
    AgentSpec, CheckRequest, CheckSettings, CheckTemplate, ConfigCheck, KubeClusterClient,
    Sweeper, Verdict,
};

/// configcheck - run an agent's own validator against a candidate configuration
#[derive(Parser, Debug)]
#[command(name = "configcheck", version, about, long_about = None)]
struct Cli {
    /// Log output format (json or text)
    #[arg(long, env = "CONFIGCHECK_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Path to a kubeconfig file; inferred from the environment when unset
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Seconds to wait for a verdict once the validator pod is watched
    #[arg(
        long,
        env = "CONFIGCHECK_DEADLINE_SECS",
        default_value_t = DEFAULT_DEADLINE.as_secs(),
        global = true
    )]
    deadline_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration for an agent
    ///
    /// Exits 0 when the configuration passed, 1 when the validator rejected
    /// it, and 2 when no verdict could be reached.
    Check(CheckArgs),

    /// Remove validator pods, Secrets and ServiceAccounts left behind by interrupted runs
    Sweep(SweepArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Path to the agent manifest (YAML) whose settings the validator inherits
    #[arg(short = 'a', long = "agent")]
    agent_file: PathBuf,

    /// Path to the candidate configuration
    #[arg(short = 'c', long = "config")]
    config_file: PathBuf,

    /// Print the result as a JSON object
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct SweepArgs {
    /// Namespace to sweep
    #[arg(short = 'n', long)]
    namespace: String,
}

/// The parts of an agent manifest the validator needs
#[derive(Debug, Deserialize)]
struct AgentManifest {
    metadata: ObjectMeta,
    spec: AgentManifestSpec,
}

#[derive(Debug, Deserialize)]
struct AgentManifestSpec {
    agent: AgentSpec,
}

/// Machine-readable result of `check --json`
#[derive(Debug, Serialize)]
struct CheckOutput<'a> {
    subject: &'a str,
    namespace: &'a str,
    passed: bool,
    reason: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install FIPS-validated crypto provider: {:?}",
            e
        );
        return Ok(ExitCode::FAILURE);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let settings = CheckSettings::with_deadline(Duration::from_secs(cli.deadline_secs));
    settings.validate()?;

    match cli.command {
        Commands::Check(args) => run_check(args, cli.kubeconfig.as_deref(), settings).await,
        Commands::Sweep(args) => run_sweep(args, cli.kubeconfig.as_deref(), settings).await,
    }
}

/// Read the agent manifest into a run request
fn parse_manifest(content: &str, config: Vec<u8>) -> anyhow::Result<CheckRequest> {
    let manifest: AgentManifest = serde_yaml::from_str(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse agent manifest: {}", e))?;
    let subject = manifest
        .metadata
        .name
        .ok_or_else(|| anyhow::anyhow!("Agent manifest must have metadata.name"))?;
    let namespace = manifest
        .metadata
        .namespace
        .ok_or_else(|| anyhow::anyhow!("Agent manifest must have metadata.namespace"))?;

    Ok(CheckRequest {
        subject,
        namespace,
        config,
        template: CheckTemplate::from_agent(&manifest.spec.agent),
    })
}

/// Cancel `token` on the first interrupt
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, canceling validation");
            token.cancel();
        }
    });
}

async fn run_check(
    args: CheckArgs,
    kubeconfig: Option<&Path>,
    settings: CheckSettings,
) -> anyhow::Result<ExitCode> {
    let manifest = tokio::fs::read_to_string(&args.agent_file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read agent manifest {:?}: {}", args.agent_file, e))?;
    let config = tokio::fs::read(&args.config_file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", args.config_file, e))?;
    let request = parse_manifest(&manifest, config)?;
    let subject = request.subject.clone();
    let namespace = request.namespace.clone();

    let client = create_client(kubeconfig).await?;
    let cluster = KubeClusterClient::with_field_manager(client, settings.field_manager.clone());
    let controller = ConfigCheck::new(Arc::new(cluster), settings);

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let verdict = match controller.run(request, &cancel).await {
        Ok(verdict) => verdict,
        Err(e) => {
            eprintln!("Configuration was not validated: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    if args.json {
        let output = CheckOutput {
            subject: &subject,
            namespace: &namespace,
            passed: verdict.is_passed(),
            reason: verdict.reason(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        match &verdict {
            Verdict::Passed => println!("Configuration for {}/{} is valid", namespace, subject),
            Verdict::Failed { reason } => {
                println!("Configuration for {}/{} is invalid:", namespace, subject);
                println!("{}", reason);
            }
        }
    }

    Ok(if verdict.is_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_sweep(
    args: SweepArgs,
    kubeconfig: Option<&Path>,
    settings: CheckSettings,
) -> anyhow::Result<ExitCode> {
    let client = create_client(kubeconfig).await?;
    let cluster = KubeClusterClient::with_field_manager(client, settings.field_manager.clone());

    let summary = Sweeper::new(&cluster, &settings)
        .sweep(&args.namespace)
        .await?;
    info!(
        namespace = %args.namespace,
        examined = summary.examined,
        reclaimed = summary.reclaimed,
        skipped = summary.skipped,
        failed = summary.failed,
        "Sweep finished"
    );

    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_args_parse() {
        let cli = Cli::try_parse_from([
            "configcheck",
            "check",
            "--agent",
            "agent.yaml",
            "--config",
            "vector.json",
            "--deadline-secs",
            "60",
        ])
        .expect("valid arguments");
        assert_eq!(cli.deadline_secs, 60);
        assert!(matches!(cli.command, Commands::Check(ref a) if !a.json));
    }

    #[test]
    fn test_manifest_resolves_template() {
        let yaml = r#"
apiVersion: observability.kaasops.io/v1alpha1
kind: Vector
metadata:
  name: agent
  namespace: observability
spec:
  agent:
    image: timberio/vector:0.34.0
    configCheck:
      image: timberio/vector:debug
"#;
        let request = parse_manifest(yaml, b"{}".to_vec()).expect("valid manifest");
        assert_eq!(request.subject, "agent");
        assert_eq!(request.namespace, "observability");
        assert_eq!(request.template.image, "timberio/vector:debug");
        assert_eq!(request.config, b"{}".to_vec());
    }

    #[test]
    fn test_manifest_requires_namespace() {
        let yaml = r#"
metadata:
  name: agent
spec:
  agent:
    image: timberio/vector:0.34.0
"#;
        assert!(parse_manifest(yaml, Vec::new()).is_err());
    }
}
