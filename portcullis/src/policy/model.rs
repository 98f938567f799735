//! Policy document model: the versioned, ordered set of rules a caller
//! submits to be compiled into kernel-level filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction a rule applies to. `Both` is a valid document value but is
/// unsupported by the compiler (spec.md §4.4) and always produces a
/// per-rule `CompilationFailed` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
    Both,
}

/// Transport protocol a rule applies to. `Any` is a valid document value
/// but is unsupported by the compiler, same as `Direction::Both`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Any,
}

/// Action taken for traffic matching a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Block,
}

/// A single port or an inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Single(u16),
    Range { start: u16, end: u16 },
}

impl PortSpec {
    /// Lower/upper bound, both inclusive.
    pub fn bounds(&self) -> (u16, u16) {
        match self {
            PortSpec::Single(p) => (*p, *p),
            PortSpec::Range { start, end } => (*start, *end),
        }
    }
}

/// IPv4/IPv6 network an endpoint matches, in CIDR notation.
///
/// Only IPv4 networks are in scope (spec.md §1); the validator rejects
/// anything else before it reaches the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointFilter {
    /// CIDR network, e.g. "10.0.0.0/8".
    pub network: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

/// One rule within a policy. Rules are evaluated in the order they appear
/// within their policy; the first matching rule's action wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub direction: Direction,
    pub protocol: Protocol,
    pub action: Action,
    pub remote: EndpointFilter,
    /// Local endpoint clause. Always rejected by the compiler (spec.md
    /// §4.4: "any local endpoint clause" is an unsupported feature), but
    /// still part of the document schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<EndpointFilter>,
    /// Optional absolute path restricting the rule to a specific process
    /// image (spec.md §2.3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_path: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Disabled rules are skipped by the compiler rather than compiled or
    /// rejected (spec.md §4.4).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_priority() -> i32 {
    0
}

fn default_enabled() -> bool {
    true
}

/// A complete, versioned policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub version: String,
    #[serde(default = "default_action")]
    pub default_action: Action,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_action() -> Action {
    Action::Allow
}

impl Policy {
    /// Rules ordered by descending priority, ties broken by original
    /// position (stable sort), matching the kernel's own weight ordering.
    pub fn ordered_rules(&self) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.rules.iter().collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
    }
}
