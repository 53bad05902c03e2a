//! Uplift - cluster autoscaling remediator for pods stuck pending

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{reflector, watcher};
use kube::{Api, Client};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use uplift::aws::AwsAutoscaling;
use uplift::config::Config;
use uplift::controller::Controller;
use uplift::failing::{pod_key, FailingPods};
use uplift::registry::{PredicateRegistry, RemediatorRegistry};
use uplift::remediator::asg::{AsgConfig, AsgRemediator, REMEDIATOR_NAME};
use uplift::remediator::Remediator;
use uplift::Error;

/// Uplift - scales AWS autoscaling groups to unstick pending pods
#[derive(Parser, Debug)]
#[command(name = "uplift", version, about, long_about = None)]
struct Cli {
    /// Path to the strategy configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Url endpoint of the Kubernetes API server (empty = in-cluster config)
    #[arg(long, default_value = "")]
    api_server: String,

    /// Time in minutes between remediation attempts
    #[arg(long, default_value_t = uplift::DEFAULT_REMEDIATION_MINUTES)]
    remediation_timer: u64,

    /// Run a remediation pass as soon as the initial pod sync completes
    #[arg(long)]
    sync_now: bool,

    /// Startup test: print a banner and exit
    #[arg(long)]
    self_test: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.self_test {
        println!("Started!");
        return Ok(());
    }

    let config_path = cli
        .config
        .as_deref()
        .context("no config file given (--config)")?;
    let config = Config::load(config_path)?;

    let client = kube_client(&cli.api_server).await?;

    // Verify we can talk to the server before committing to the watch.
    let version = client
        .apiserver_version()
        .await
        .context("unable to fetch server version from the Kubernetes API")?;
    info!(version = %version.git_version, "connected to Kubernetes API server");

    let aws = Arc::new(AwsAutoscaling::connect().await);
    let predicates = PredicateRegistry::new();
    let remediators = RemediatorRegistry::new();
    remediators.register(
        REMEDIATOR_NAME,
        Arc::new(move |value| {
            let config: AsgConfig = serde_yaml::from_value(value.clone())
                .map_err(|e| Error::config(format!("{REMEDIATOR_NAME}: {e}")))?;
            Ok(Box::new(AsgRemediator::new(config, aws.clone())) as Box<dyn Remediator>)
        }),
    )?;

    let strategies = config.build_strategies(&predicates, &remediators)?;
    info!(strategies = strategies.len(), "strategies loaded");

    let failing = Arc::new(FailingPods::new());
    let pods: Api<Pod> = Api::all(client);
    let (store, writer) = reflector::store();

    // The watch task keeps the cache fresh and evicts deleted pods from the
    // failing set immediately rather than waiting for the next reconcile.
    let watch_failing = failing.clone();
    let stream = reflector(writer, watcher(pods, watcher::Config::default()));
    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            match stream.try_next().await {
                Ok(Some(watcher::Event::Delete(pod))) => {
                    debug!(pod = %pod_key(&pod), "pod deleted upstream");
                    watch_failing.remove(&pod_key(&pod));
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => warn!(error = %err, "pod watch error"),
            }
        }
    });

    info!("waiting for initial pod sync");
    store
        .wait_until_ready()
        .await
        .context("pod watch ended before the initial sync completed")?;
    info!("initial pod sync complete");

    let controller = Controller::new(
        store,
        failing,
        strategies,
        Duration::from_secs(cli.remediation_timer * 60),
    );
    controller.run(cli.sync_now).await;

    Ok(())
}

async fn kube_client(api_server: &str) -> anyhow::Result<Client> {
    let config = if api_server.is_empty() {
        info!("no API endpoint given, using in-cluster config");
        kube::Config::infer()
            .await
            .context("could not infer Kubernetes config")?
    } else {
        kube::Config::new(
            api_server
                .parse::<http::Uri>()
                .context("invalid --api-server url")?,
        )
    };
    Ok(Client::try_from(config)?)
}
