//! Typed topology model for Netforge.
//!
//! A topology is the declarative description of the desired network: one
//! VPC, its subnets split into public and private tiers, the gateway
//! policy, and the security rules per tier. YAML documents are parsed
//! into this model at the boundary; every other component operates on the
//! typed model and never on raw untyped maps.
//!
//! ## Example document
//!
//! ```yaml
//! vpc_name: prod-secure-network
//! cidr: 10.0.0.0/16
//! region: us-east-1
//! enable_dns_hostnames: true
//! enable_dns_support: true
//! tags:
//!   Environment: production
//! subnets:
//!   - name: public-1a
//!     cidr: 10.0.1.0/24
//!     type: public
//!     az: us-east-1a
//!   - name: private-1a
//!     cidr: 10.0.10.0/24
//!     type: private
//!     az: us-east-1a
//! nat_gateway:
//!   enabled: true
//!   availability_zone: us-east-1a
//! security_groups:
//!   public:
//!     - protocol: tcp
//!       from_port: 443
//!       to_port: 443
//!       cidr: 0.0.0.0/0
//! ```

pub mod validate;

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use validate::{validate, ValidationReport, Violation};

/// Tier classification for a subnet: public-facing or private/internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetTier {
    /// Routed to the Internet Gateway; instances get public IPs on launch.
    Public,
    /// Routed through the NAT gateway when one exists, otherwise no
    /// outbound default route.
    Private,
}

impl fmt::Display for SubnetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetTier::Public => write!(f, "public"),
            SubnetTier::Private => write!(f, "private"),
        }
    }
}

/// A single subnet declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    /// Logical name, unique within the topology.
    pub name: String,
    /// Subnet CIDR; must be a sub-range of the VPC CIDR.
    pub cidr: String,
    /// Tier classification (`type` in the YAML document).
    #[serde(rename = "type")]
    pub tier: SubnetTier,
    /// Availability zone, e.g. `us-east-1a`.
    pub az: String,
}

/// NAT gateway policy for the topology.
///
/// When disabled, no NAT gateway is created and private subnets receive
/// no outbound default route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGatewayPolicy {
    /// Whether a NAT gateway should be provisioned.
    #[serde(default)]
    pub enabled: bool,
    /// Preferred availability zone. The NAT gateway is placed in the
    /// public subnet in this zone; when absent, the first public subnet
    /// in declared order hosts it.
    #[serde(default)]
    pub availability_zone: Option<String>,
}

/// A single ingress allow rule.
///
/// The security posture is deny-all except explicitly listed rules: a
/// tier with no rules yields a security group with no ingress entries.
///
/// Ports are kept as `u32` so an out-of-range document value surfaces as
/// a validation violation rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// IP protocol: `tcp`, `udp`, `icmp` or `-1` (all).
    pub protocol: String,
    /// Start of the port range.
    pub from_port: u32,
    /// End of the port range.
    pub to_port: u32,
    /// Source CIDR the rule allows traffic from.
    pub cidr: String,
}

/// Root entity: the declarative description of the desired network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTopology {
    /// Topology name; doubles as the run exclusivity key and the Name
    /// tag of the VPC.
    pub vpc_name: String,
    /// VPC CIDR block.
    pub cidr: String,
    /// AWS region the topology is provisioned into.
    pub region: String,
    /// Enable DNS hostnames on the VPC.
    #[serde(default = "default_true")]
    pub enable_dns_hostnames: bool,
    /// Enable DNS support on the VPC.
    #[serde(default = "default_true")]
    pub enable_dns_support: bool,
    /// Additional tags applied to the VPC, insertion-ordered.
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    /// Subnet declarations in creation order.
    pub subnets: Vec<SubnetSpec>,
    /// NAT gateway policy; absent means disabled.
    #[serde(default)]
    pub nat_gateway: Option<NatGatewayPolicy>,
    /// Tier name to ordered ingress rules.
    #[serde(default)]
    pub security_groups: IndexMap<String, Vec<SecurityRule>>,
    /// Provision a default-deny network ACL per subnet tier.
    #[serde(default)]
    pub network_acls: bool,
}

fn default_true() -> bool {
    true
}

impl NetworkTopology {
    /// Load and parse a topology document from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::topology_load(path, "could not read file", Some(Box::new(e)))
        })?;
        Self::from_yaml(&contents)
            .map_err(|e| Error::topology_load(path, e.to_string(), None))
    }

    /// Parse a topology document from a YAML string.
    pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Whether the NAT gateway policy is enabled.
    pub fn nat_enabled(&self) -> bool {
        self.nat_gateway.as_ref().is_some_and(|p| p.enabled)
    }

    /// Subnets of the given tier, in declared order.
    pub fn subnets_of(&self, tier: SubnetTier) -> impl Iterator<Item = &SubnetSpec> {
        self.subnets.iter().filter(move |s| s.tier == tier)
    }

    /// The public subnet that will host the NAT gateway, honoring the
    /// policy's availability zone preference.
    pub fn nat_host_subnet(&self) -> Option<&SubnetSpec> {
        let preferred_az = self
            .nat_gateway
            .as_ref()
            .and_then(|p| p.availability_zone.as_deref());

        match preferred_az {
            Some(az) => self
                .subnets_of(SubnetTier::Public)
                .find(|s| s.az == az)
                .or_else(|| self.subnets_of(SubnetTier::Public).next()),
            None => self.subnets_of(SubnetTier::Public).next(),
        }
    }

    /// Validate the topology, returning every violation found.
    pub fn validate(&self) -> ValidationReport {
        validate(self)
    }
}
