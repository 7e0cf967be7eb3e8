use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use db_redeploy::cluster::KubeCluster;
use db_redeploy::config::{ConfigLayer, RedeployConfig};
use db_redeploy::redeploy::{RedeployReport, Redeployer};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the kubeconfig file (defaults to $KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to target
    #[arg(long, env = "REDEPLOY_CONTEXT")]
    context: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "REDEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Restart Deployments whose name contains this substring
    #[arg(long, env = "REDEPLOY_NAME_FILTER")]
    name_filter: Option<String>,

    /// Number of Deployments restarted at once
    #[arg(long, env = "REDEPLOY_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Only report pods whose ReplicaSet belongs to the Deployment
    /// (`--verify-ownership=false` overrides a config file's `true`)
    #[arg(
        long,
        env = "REDEPLOY_VERIFY_OWNERSHIP",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    verify_ownership: Option<bool>,

    /// Report format written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Log format written to stderr
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
    /// Last Deployment name plus every pod, as one JSON object
    Flat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn overrides(&self) -> ConfigLayer {
        ConfigLayer {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            name_filter: self.name_filter.clone(),
            concurrency: self.concurrency,
            verify_ownership: self.verify_ownership,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Redeploy failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let config = RedeployConfig::load(args.config.as_deref(), args.overrides())
        .context("invalid configuration")?;

    let cluster = KubeCluster::connect(config.kubeconfig.as_deref(), config.context.as_deref())
        .await
        .context("failed to create Kubernetes client")?;
    info!(context = ?config.context, "Connected to Kubernetes cluster");

    let report = Redeployer::new(cluster, config.options).run().await?;

    match render(&report, args.output)? {
        Some(document) => print!("{}", document),
        None => log_report(&report),
    }
    Ok(())
}

/// Serialize the report for stdout; text output goes to the log instead
fn render(report: &RedeployReport, format: OutputFormat) -> anyhow::Result<Option<String>> {
    let document = match format {
        OutputFormat::Text => return Ok(None),
        OutputFormat::Json => serde_json::to_string_pretty(report)? + "\n",
        OutputFormat::Yaml => serde_yaml::to_string(report)?,
        OutputFormat::Flat => serde_json::to_string_pretty(&report.flatten())? + "\n",
    };
    Ok(Some(document))
}

fn log_report(report: &RedeployReport) {
    for deployment in report.deployments() {
        info!(
            deployment = %deployment.deployment_name,
            namespace = %deployment.namespace,
            restarted_at = %deployment.restarted_at,
            "Successfully patched deployment"
        );
        for pod in &deployment.pods {
            info!(
                pod = %pod.pod_name,
                namespace = %pod.namespace,
                restarted_on = %pod.restarted_at,
                "Successfully redeployed pod"
            );
        }
    }
    info!(
        "{} deployments restarted, {} pods rolled",
        report.len(),
        report.pod_count()
    );
}
