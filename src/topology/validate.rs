//! Topology validation.
//!
//! `validate` runs every check and returns the full set of violations,
//! so a single validation pass reports everything wrong with a document.
//! No side effects; a run never starts while the report is non-empty.

use std::collections::HashSet;
use std::fmt;

use ipnet::Ipv4Net;
use serde::Serialize;
use thiserror::Error;

use super::{NetworkTopology, SubnetTier};

/// Highest valid TCP/UDP port.
const MAX_PORT: u32 = 65_535;

/// Protocols accepted in security rules. `-1` is the AWS wildcard.
const KNOWN_PROTOCOLS: &[&str] = &["tcp", "udp", "icmp", "-1"];

/// A single validation violation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "violation")]
pub enum Violation {
    /// The VPC CIDR block is not a well-formed IPv4 network.
    #[error("VPC CIDR '{cidr}' is not a valid IPv4 network")]
    InvalidVpcCidr { cidr: String },

    /// A subnet CIDR block is not a well-formed IPv4 network.
    #[error("Subnet '{subnet}' has invalid CIDR '{cidr}'")]
    InvalidSubnetCidr { subnet: String, cidr: String },

    /// A subnet CIDR is not contained in the VPC CIDR.
    #[error("Subnet '{subnet}' CIDR {cidr} is outside the VPC range {vpc_cidr}")]
    SubnetOutsideVpc {
        subnet: String,
        cidr: String,
        vpc_cidr: String,
    },

    /// Two subnets have overlapping CIDR ranges.
    #[error("Subnets '{first}' and '{second}' have overlapping CIDR ranges")]
    OverlappingSubnets { first: String, second: String },

    /// Two subnets share a name.
    #[error("Duplicate subnet name '{name}'")]
    DuplicateSubnetName { name: String },

    /// A security rule has an inverted port range.
    #[error("Rule {index} for tier '{tier}' has inverted port range {from_port}-{to_port}")]
    InvertedPortRange {
        tier: String,
        index: usize,
        from_port: u32,
        to_port: u32,
    },

    /// A security rule references a port outside [0, 65535].
    #[error("Rule {index} for tier '{tier}' has out-of-range port {port}")]
    PortOutOfRange {
        tier: String,
        index: usize,
        port: u32,
    },

    /// A security rule has an unknown protocol.
    #[error("Rule {index} for tier '{tier}' has unknown protocol '{protocol}'")]
    UnknownProtocol {
        tier: String,
        index: usize,
        protocol: String,
    },

    /// A security rule source CIDR is not a well-formed IPv4 network.
    #[error("Rule {index} for tier '{tier}' has invalid source CIDR '{cidr}'")]
    InvalidRuleCidr {
        tier: String,
        index: usize,
        cidr: String,
    },

    /// A security group tier name is empty.
    #[error("Security group tier name must not be empty")]
    EmptySecurityGroupTier,

    /// NAT is enabled but the topology declares no public subnet to host it.
    #[error("NAT gateway is enabled but no public subnet exists to host it")]
    NatWithoutPublicSubnet,

    /// The NAT policy names an availability zone with no public subnet.
    #[error("NAT gateway availability zone '{az}' has no public subnet")]
    NatZoneWithoutPublicSubnet { az: String },
}

/// Result of validating a topology: the set of all violations found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    /// Whether the topology passed every check.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// The violations found, in check order.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of violations found.
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// Whether the report is empty.
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "  - {}", violation)?;
        }
        Ok(())
    }
}

/// Parse a CIDR string the strict way: host bits set below the prefix
/// make the block invalid, matching what the remote API accepts.
fn parse_cidr(cidr: &str) -> Option<Ipv4Net> {
    let net: Ipv4Net = cidr.parse().ok()?;
    if net != net.trunc() {
        return None;
    }
    Some(net)
}

/// Validate a topology, returning every violation found.
pub fn validate(topology: &NetworkTopology) -> ValidationReport {
    let mut report = ValidationReport::default();

    let vpc_net = parse_cidr(&topology.cidr);
    if vpc_net.is_none() {
        report.push(Violation::InvalidVpcCidr {
            cidr: topology.cidr.clone(),
        });
    }

    // Subnet names and CIDRs. Parsed nets are kept positionally so the
    // overlap pass below can reference both subnet names.
    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut subnet_nets: Vec<Option<Ipv4Net>> = Vec::with_capacity(topology.subnets.len());

    for subnet in &topology.subnets {
        if !seen_names.insert(subnet.name.as_str()) {
            report.push(Violation::DuplicateSubnetName {
                name: subnet.name.clone(),
            });
        }

        let net = parse_cidr(&subnet.cidr);
        match net {
            None => {
                report.push(Violation::InvalidSubnetCidr {
                    subnet: subnet.name.clone(),
                    cidr: subnet.cidr.clone(),
                });
            }
            Some(net) => {
                if let Some(vpc) = vpc_net {
                    if !vpc.contains(&net) {
                        report.push(Violation::SubnetOutsideVpc {
                            subnet: subnet.name.clone(),
                            cidr: subnet.cidr.clone(),
                            vpc_cidr: topology.cidr.clone(),
                        });
                    }
                }
            }
        }
        subnet_nets.push(net);
    }

    // Pairwise overlap. Two IPv4 prefixes overlap exactly when one
    // contains the other.
    for i in 0..topology.subnets.len() {
        for j in (i + 1)..topology.subnets.len() {
            if let (Some(a), Some(b)) = (subnet_nets[i], subnet_nets[j]) {
                if a.contains(&b) || b.contains(&a) {
                    report.push(Violation::OverlappingSubnets {
                        first: topology.subnets[i].name.clone(),
                        second: topology.subnets[j].name.clone(),
                    });
                }
            }
        }
    }

    // Security rules.
    for (tier, rules) in &topology.security_groups {
        if tier.trim().is_empty() {
            report.push(Violation::EmptySecurityGroupTier);
        }

        for (index, rule) in rules.iter().enumerate() {
            if !KNOWN_PROTOCOLS.contains(&rule.protocol.as_str()) {
                report.push(Violation::UnknownProtocol {
                    tier: tier.clone(),
                    index,
                    protocol: rule.protocol.clone(),
                });
            }

            for port in [rule.from_port, rule.to_port] {
                if port > MAX_PORT {
                    report.push(Violation::PortOutOfRange {
                        tier: tier.clone(),
                        index,
                        port,
                    });
                }
            }

            if rule.from_port <= MAX_PORT
                && rule.to_port <= MAX_PORT
                && rule.from_port > rule.to_port
            {
                report.push(Violation::InvertedPortRange {
                    tier: tier.clone(),
                    index,
                    from_port: rule.from_port,
                    to_port: rule.to_port,
                });
            }

            if parse_cidr(&rule.cidr).is_none() {
                report.push(Violation::InvalidRuleCidr {
                    tier: tier.clone(),
                    index,
                    cidr: rule.cidr.clone(),
                });
            }
        }
    }

    // NAT placement. The original builder skipped NAT creation with a
    // log line when no public subnet existed; surfacing it here catches
    // the defect before any remote call is made.
    if topology.nat_enabled() {
        if topology.subnets_of(SubnetTier::Public).next().is_none() {
            report.push(Violation::NatWithoutPublicSubnet);
        } else if let Some(az) = topology
            .nat_gateway
            .as_ref()
            .and_then(|p| p.availability_zone.as_deref())
        {
            if !topology.subnets_of(SubnetTier::Public).any(|s| s.az == az) {
                report.push(Violation::NatZoneWithoutPublicSubnet { az: az.to_string() });
            }
        }
    }

    report
}
