//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use netforge::error::{Error, Result};
use netforge::orchestrator::{plan, Orchestrator};
use netforge::provider::NetworkProvider;
use netforge::provisioner::Provisioner;
use netforge::retry::RetryPolicy;
use netforge::state::JsonStateStore;
use netforge::teardown::{report_to_result, TeardownEngine};
use netforge::topology::NetworkTopology;

use super::output::OutputFormatter;
use super::{ApplyArgs, Cli, DryRunArgs, TeardownArgs};

/// Shared context for command execution.
pub struct CommandContext {
    /// Terminal output formatter.
    pub output: OutputFormatter,
    state_dir: std::path::PathBuf,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl CommandContext {
    /// Build the context from parsed arguments.
    pub fn new(cli: &Cli) -> Self {
        Self {
            output: OutputFormatter::new(!cli.no_color, cli.verbosity()),
            state_dir: cli.state_dir.clone(),
            retry: RetryPolicy::exponential(
                cli.max_retries,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            call_timeout: Duration::from_secs(cli.timeout),
        }
    }
}

/// Construct the cloud provider for a region.
///
/// Requires the `aws` cargo feature; without it every remote-calling
/// command reports the provider as unavailable. Dry-run never needs one.
#[allow(unused_variables)]
async fn build_provider(region: &str) -> Result<Arc<dyn NetworkProvider>> {
    #[cfg(feature = "aws")]
    {
        Ok(Arc::new(
            netforge::provider::AwsProvider::connect(region).await,
        ))
    }
    #[cfg(not(feature = "aws"))]
    {
        Err(Error::ProviderUnavailable("aws".into()))
    }
}

fn load_validated_topology(
    path: &std::path::Path,
    output: &OutputFormatter,
) -> Result<NetworkTopology> {
    let topology = NetworkTopology::from_file(path)?;
    let report = topology.validate();
    if !report.is_valid() {
        output.validation_failure(&report);
        return Err(Error::Validation(report));
    }
    Ok(topology)
}

impl ApplyArgs {
    /// Provision the topology and write the state document.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let topology = load_validated_topology(&self.topology, &ctx.output)?;
        ctx.output.banner(&format!("APPLY {}", topology.vpc_name));
        ctx.output.detail(&format!(
            "region {}, state directory {}",
            topology.region,
            ctx.state_dir.display()
        ));

        let provider = build_provider(&topology.region).await?;
        let provisioner =
            Provisioner::new(provider).with_call_timeout(ctx.call_timeout);
        let store = Arc::new(JsonStateStore::new(&ctx.state_dir));
        let orchestrator = Orchestrator::new(provisioner, store).with_retry_policy(ctx.retry);

        // Ctrl-C cancels between steps; a call already in flight is
        // never interrupted.
        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let state = orchestrator.apply(&topology).await?;

        ctx.output.deployment(&state);
        ctx.output.success(&format!(
            "{} resource(s) provisioned in {}",
            state.resources.len(),
            state.region
        ));
        ctx.output.info(&format!(
            "State written to {}",
            ctx.state_dir
                .join(format!("{}-state.json", topology.vpc_name))
                .display()
        ));
        Ok(())
    }
}

impl DryRunArgs {
    /// Validate the topology and print the execution plan. Issues zero
    /// remote calls and writes no state.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let topology = load_validated_topology(&self.topology, &ctx.output)?;
        ctx.output.banner(&format!("DRY-RUN {}", topology.vpc_name));

        let plan = plan(&topology)?;
        ctx.output.plan(&plan);
        ctx.output.success(&format!(
            "topology valid, {} step(s) planned, no remote calls issued",
            plan.len()
        ));
        Ok(())
    }
}

impl TeardownArgs {
    /// Delete everything recorded in the state document.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut state = JsonStateStore::load_file(&self.state_file)?;
        ctx.output.banner(&format!("TEARDOWN {}", state.topology));
        debug!(resources = state.resources.len(), region = %state.region, "state document loaded");

        let provider = build_provider(&state.region).await?;
        let provisioner =
            Provisioner::new(provider).with_call_timeout(ctx.call_timeout);
        let store = Arc::new(JsonStateStore::for_file(&self.state_file));
        let engine = TeardownEngine::new(provisioner, store).with_retry_policy(ctx.retry);

        let report = engine.teardown(&mut state).await?;
        ctx.output.teardown_summary(&report);

        if report.is_clean() {
            ctx.output.success(&format!("teardown complete ({})", report));
        } else {
            ctx.output.warn(&format!(
                "teardown incomplete ({}); re-run after resolving the conflicts",
                report
            ));
        }
        report_to_result(&report)
    }
}
