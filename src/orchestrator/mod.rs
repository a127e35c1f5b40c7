//! Dependency orchestrator.
//!
//! Turns a validated topology into an [`ExecutionPlan`] - the ordered
//! step list over the fixed dependency graph - and executes it one step
//! at a time:
//!
//! ```text
//! Vpc -> InternetGateway -> RouteTable(public)
//!     -> RouteTable(private, when private subnets exist)
//!     -> Subnet(*) -> NatGateway(optional, hosted in a public subnet)
//!     -> RouteTableAssociation(*) -> SecurityGroup(*) -> NetworkAcl(*)
//! ```
//!
//! Steps within a tier run in declared order, never concurrently, so a
//! remote naming or CIDR conflict is always attributable to one step.
//! Transient failures are retried with the injected [`RetryPolicy`],
//! describing by logical name before each re-issued create so a call
//! that landed remotely is adopted, not duplicated. `Conflict` and
//! `Permission` failures halt the run; the triggering error is persisted
//! into the deployment state before it is surfaced. Teardown is never
//! invoked automatically.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::provider::{ProvisionError, ResourceRequest, RouteTarget};
use crate::provisioner::Provisioner;
use crate::retry::RetryPolicy;
use crate::state::{
    DeploymentState, ProvisionedResource, ResourceGraph, ResourceKind, StatePersistence,
};
use crate::topology::{NetworkTopology, SecurityRule, SubnetTier};

/// Per-step execution state.
///
/// `Pending -> Creating -> Created` on the success path;
/// `Pending -> Creating -> Failed` is terminal and halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Creating,
    Created,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Pending => write!(f, "pending"),
            StepState::Creating => write!(f, "creating"),
            StepState::Created => write!(f, "created"),
            StepState::Failed => write!(f, "failed"),
        }
    }
}

/// Logical route target, resolved to a remote id at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTargetRef {
    InternetGateway(String),
    NatGateway(String),
}

/// Topology-derived parameters for one planned step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSpec {
    Vpc {
        cidr: String,
        enable_dns_hostnames: bool,
        enable_dns_support: bool,
        tags: Vec<(String, String)>,
    },
    InternetGateway {
        vpc: String,
    },
    RouteTable {
        vpc: String,
        default_route: Option<RouteTargetRef>,
    },
    Subnet {
        vpc: String,
        cidr: String,
        availability_zone: String,
        tier: SubnetTier,
    },
    NatGateway {
        subnet: String,
        route_table: Option<String>,
    },
    RouteTableAssociation {
        subnet: String,
        route_table: String,
    },
    SecurityGroup {
        vpc: String,
        description: String,
        rules: Vec<SecurityRule>,
    },
    NetworkAcl {
        vpc: String,
    },
}

/// One entry of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Logical name the created resource will carry.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical names this step depends on; all must be present in the
    /// deployment state before the step becomes eligible.
    pub depends_on: BTreeSet<String>,
    /// Topology-derived parameters.
    pub spec: StepSpec,
}

impl PlannedStep {
    fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        depends_on: impl IntoIterator<Item = String>,
        spec: StepSpec,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: depends_on.into_iter().collect(),
            spec,
        }
    }

    /// Resolve logical references against the deployment state and build
    /// the provider request.
    pub fn build_request(
        &self,
        state: &DeploymentState,
    ) -> std::result::Result<ResourceRequest, ProvisionError> {
        let resolve = |logical: &str| -> std::result::Result<String, ProvisionError> {
            state
                .remote_id(logical)
                .map(str::to_string)
                .ok_or_else(|| {
                    ProvisionError::InvalidRequest(format!(
                        "step '{}' references '{}' which is not in the deployment state",
                        self.name, logical
                    ))
                })
        };

        let request = match &self.spec {
            StepSpec::Vpc {
                cidr,
                enable_dns_hostnames,
                enable_dns_support,
                tags,
            } => ResourceRequest::Vpc {
                name: self.name.clone(),
                cidr: cidr.clone(),
                enable_dns_hostnames: *enable_dns_hostnames,
                enable_dns_support: *enable_dns_support,
                tags: tags.clone(),
            },
            StepSpec::InternetGateway { vpc } => ResourceRequest::InternetGateway {
                name: self.name.clone(),
                vpc_id: resolve(vpc)?,
            },
            StepSpec::RouteTable { vpc, default_route } => {
                let default_route = match default_route {
                    None => None,
                    Some(RouteTargetRef::InternetGateway(igw)) => {
                        Some(RouteTarget::InternetGateway(resolve(igw)?))
                    }
                    Some(RouteTargetRef::NatGateway(nat)) => {
                        Some(RouteTarget::NatGateway(resolve(nat)?))
                    }
                };
                ResourceRequest::RouteTable {
                    name: self.name.clone(),
                    vpc_id: resolve(vpc)?,
                    default_route,
                }
            }
            StepSpec::Subnet {
                vpc,
                cidr,
                availability_zone,
                tier,
            } => ResourceRequest::Subnet {
                name: self.name.clone(),
                vpc_id: resolve(vpc)?,
                cidr: cidr.clone(),
                availability_zone: availability_zone.clone(),
                map_public_ip: *tier == SubnetTier::Public,
                tier: tier.to_string(),
            },
            StepSpec::NatGateway {
                subnet,
                route_table,
            } => ResourceRequest::NatGateway {
                name: self.name.clone(),
                subnet_id: resolve(subnet)?,
                route_table_id: route_table.as_deref().map(resolve).transpose()?,
            },
            StepSpec::RouteTableAssociation {
                subnet,
                route_table,
            } => ResourceRequest::RouteTableAssociation {
                name: self.name.clone(),
                subnet_id: resolve(subnet)?,
                route_table_id: resolve(route_table)?,
            },
            StepSpec::SecurityGroup {
                vpc,
                description,
                rules,
            } => ResourceRequest::SecurityGroup {
                name: self.name.clone(),
                vpc_id: resolve(vpc)?,
                description: description.clone(),
                ingress: rules.clone(),
            },
            StepSpec::NetworkAcl { vpc } => ResourceRequest::NetworkAcl {
                name: self.name.clone(),
                vpc_id: resolve(vpc)?,
            },
        };
        Ok(request)
    }
}

/// The full ordered step list for one topology.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    /// Steps in execution order.
    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }
}

/// Compute the execution plan for a topology.
///
/// Pure: no remote calls, no state writes. Dry-run is validation plus
/// this function. The computed order is cross-checked against a
/// dependency graph before it is returned.
pub fn plan(topology: &NetworkTopology) -> Result<ExecutionPlan> {
    let vpc = topology.vpc_name.clone();
    let mut steps = Vec::new();

    steps.push(PlannedStep::new(
        vpc.clone(),
        ResourceKind::Vpc,
        [],
        StepSpec::Vpc {
            cidr: topology.cidr.clone(),
            enable_dns_hostnames: topology.enable_dns_hostnames,
            enable_dns_support: topology.enable_dns_support,
            tags: topology
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        },
    ));

    let igw = format!("{}-igw", vpc);
    steps.push(PlannedStep::new(
        igw.clone(),
        ResourceKind::InternetGateway,
        [vpc.clone()],
        StepSpec::InternetGateway { vpc: vpc.clone() },
    ));

    let public_rt = format!("{}-public-rt", vpc);
    steps.push(PlannedStep::new(
        public_rt.clone(),
        ResourceKind::RouteTable,
        [vpc.clone(), igw.clone()],
        StepSpec::RouteTable {
            vpc: vpc.clone(),
            default_route: Some(RouteTargetRef::InternetGateway(igw.clone())),
        },
    ));

    // The private route table exists only when a private subnet will use
    // it. Its outbound default route, when NAT is enabled, is installed
    // by the NAT gateway step once the gateway id exists.
    let has_private = topology.subnets_of(SubnetTier::Private).next().is_some();
    let private_rt = has_private.then(|| format!("{}-private-rt", vpc));
    if let Some(private_rt) = &private_rt {
        steps.push(PlannedStep::new(
            private_rt.clone(),
            ResourceKind::RouteTable,
            [vpc.clone()],
            StepSpec::RouteTable {
                vpc: vpc.clone(),
                default_route: None,
            },
        ));
    }

    for subnet in &topology.subnets {
        steps.push(PlannedStep::new(
            subnet.name.clone(),
            ResourceKind::Subnet,
            [vpc.clone()],
            StepSpec::Subnet {
                vpc: vpc.clone(),
                cidr: subnet.cidr.clone(),
                availability_zone: subnet.az.clone(),
                tier: subnet.tier,
            },
        ));
    }

    if topology.nat_enabled() {
        // Validation guarantees a public subnet exists; an empty result
        // here mirrors the original behavior of skipping NAT creation.
        if let Some(host) = topology.nat_host_subnet() {
            let mut depends_on = vec![host.name.clone()];
            depends_on.extend(private_rt.clone());
            steps.push(PlannedStep::new(
                format!("{}-nat", vpc),
                ResourceKind::NatGateway,
                depends_on,
                StepSpec::NatGateway {
                    subnet: host.name.clone(),
                    route_table: private_rt.clone(),
                },
            ));
        } else {
            debug!("NAT gateway enabled but no public subnet exists; skipping");
        }
    }

    for subnet in &topology.subnets {
        let route_table = match subnet.tier {
            SubnetTier::Public => public_rt.clone(),
            SubnetTier::Private => private_rt
                .clone()
                .expect("private subnet implies private route table"),
        };
        steps.push(PlannedStep::new(
            format!("{}-rta", subnet.name),
            ResourceKind::RouteTableAssociation,
            [subnet.name.clone(), route_table.clone()],
            StepSpec::RouteTableAssociation {
                subnet: subnet.name.clone(),
                route_table,
            },
        ));
    }

    if topology.security_groups.is_empty() {
        // No rules declared: the posture is still deny-all except listed
        // rules, so a single empty (deny-all) group is provisioned.
        steps.push(PlannedStep::new(
            format!("{}-default", vpc),
            ResourceKind::SecurityGroup,
            [vpc.clone()],
            StepSpec::SecurityGroup {
                vpc: vpc.clone(),
                description: format!("Default deny-all security group for {}", vpc),
                rules: Vec::new(),
            },
        ));
    } else {
        for (tier, rules) in &topology.security_groups {
            steps.push(PlannedStep::new(
                tier.clone(),
                ResourceKind::SecurityGroup,
                [vpc.clone()],
                StepSpec::SecurityGroup {
                    vpc: vpc.clone(),
                    description: format!("Security group for {}", tier),
                    rules: rules.clone(),
                },
            ));
        }
    }

    if topology.network_acls {
        let mut tiers: Vec<SubnetTier> = Vec::new();
        for subnet in &topology.subnets {
            if !tiers.contains(&subnet.tier) {
                tiers.push(subnet.tier);
            }
        }
        for tier in tiers {
            steps.push(PlannedStep::new(
                format!("{}-{}-nacl", vpc, tier),
                ResourceKind::NetworkAcl,
                [vpc.clone()],
                StepSpec::NetworkAcl { vpc: vpc.clone() },
            ));
        }
    }

    // Cross-check the computed order against the dependency graph.
    let mut graph = ResourceGraph::new();
    for step in &steps {
        graph
            .add_resource(&step.name, step.depends_on.iter())
            .map_err(|e| Error::Internal(format!("inconsistent plan: {}", e)))?;
    }
    let names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
    if !graph.respects_order(&names) {
        return Err(Error::Internal(
            "computed plan violates dependency order".into(),
        ));
    }

    Ok(ExecutionPlan { steps })
}

/// Executes execution plans sequentially against a provisioner,
/// persisting deployment state after every step.
pub struct Orchestrator {
    provisioner: Provisioner,
    store: Arc<dyn StatePersistence>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with the default retry policy.
    pub fn new(provisioner: Provisioner, store: Arc<dyn StatePersistence>) -> Self {
        Self {
            provisioner,
            store,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Token that cancels the run between steps. Cancellation never
    /// interrupts a call already in flight.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Provision the topology, returning the final deployment state.
    ///
    /// Validates first; a run never starts for an invalid topology or
    /// while another run for the same topology is in progress. On a
    /// fatal step failure the state is persisted with status `failed`
    /// and the error before this returns.
    pub async fn apply(&self, topology: &NetworkTopology) -> Result<DeploymentState> {
        let report = topology.validate();
        if !report.is_valid() {
            return Err(Error::Validation(report));
        }

        let plan = plan(topology)?;

        match self.store.load(&topology.vpc_name) {
            Ok(previous) if previous.is_active() => {
                return Err(Error::RunAlreadyActive(topology.vpc_name.clone()));
            }
            Ok(_) | Err(crate::state::StateError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let mut state = DeploymentState::new(&topology.vpc_name, &topology.region);
        self.store.save(&state)?;
        info!(topology = %topology.vpc_name, steps = plan.len(), "provisioning run started");

        for step in plan.steps() {
            if self.cancel.is_cancelled() {
                warn!(topology = %topology.vpc_name, "cancellation requested, stopping before next step");
                state.mark_cancelled();
                self.store.save(&state)?;
                return Err(Error::Cancelled(topology.vpc_name.clone()));
            }

            match self.execute_step(step, &state).await {
                Ok(resource) => {
                    info!(step = %step.name, kind = %step.kind, id = %resource.remote_id, state = %StepState::Created, "step complete");
                    self.store.append(&mut state, resource)?;
                }
                Err(error) => {
                    warn!(step = %step.name, kind = %step.kind, state = %StepState::Failed, %error, "step failed, halting run");
                    state.mark_failed(format!("step '{}': {}", step.name, error));
                    self.store.save(&state)?;
                    return Err(Error::provision(&step.name, error));
                }
            }
        }

        state.mark_complete();
        self.store.save(&state)?;
        info!(topology = %topology.vpc_name, resources = state.resources.len(), "provisioning run complete");
        Ok(state)
    }

    /// Execute one step: a single create, retried on transient failures
    /// with a describe-by-name between attempts.
    async fn execute_step(
        &self,
        step: &PlannedStep,
        state: &DeploymentState,
    ) -> std::result::Result<ProvisionedResource, ProvisionError> {
        let request = step.build_request(state)?;
        debug!(step = %step.name, state = %StepState::Creating, "executing step");

        let mut attempt = 0;
        loop {
            match self
                .provisioner
                .create(&request, step.depends_on.iter().cloned())
                .await
            {
                Ok(resource) => return Ok(resource),
                Err(error) if error.is_transient() => {
                    if !self.retry.should_continue(attempt) {
                        warn!(step = %step.name, attempts = attempt + 1, "transient failures exhausted all retries");
                        return Err(error);
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(step = %step.name, %error, ?delay, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;

                    // The failed call may have landed remotely. Describe
                    // by logical name before re-issuing the create.
                    match self.provisioner.find_existing(step.kind, &step.name).await {
                        Ok(Some(remote_id)) => {
                            info!(step = %step.name, %remote_id, "found resource created by an earlier attempt, adopting");
                            return Ok(self.provisioner.adopt(
                                &step.name,
                                step.kind,
                                remote_id,
                                step.depends_on.iter().cloned(),
                            ));
                        }
                        Ok(None) => {}
                        Err(describe_error) => {
                            warn!(step = %step.name, error = %describe_error, "describe before retry failed, re-issuing create");
                        }
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}
