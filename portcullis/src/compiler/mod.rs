//! Compiles policy rules into [`CompiledFilter`] entries with a
//! deterministic `filter_key`, so the reconciler can diff desired state
//! against installed state by key alone (spec.md §3, §4.2).

use ipnetwork::IpNetwork;
use portcullis_shared::errors::RuleError;
use sha2::{Digest, Sha256};

use crate::policy::{Action, Direction, Policy, PortSpec, Protocol, Rule};

/// Weight floor every compiled filter is built on top of, leaving headroom
/// above system defaults but below any emergency override class (spec.md
/// §4.4).
pub const BASE_WEIGHT: u64 = 1000;

/// One kernel-facing filter compiled from a single (rule, port-range) pair.
///
/// A rule with N disjoint port ranges compiles into N `CompiledFilter`s; a
/// rule with no port ranges compiles into exactly one (matching all ports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFilter {
    pub filter_key: u128,
    pub rule_id: String,
    pub direction: Direction,
    pub protocol: Protocol,
    pub action: Action,
    pub network: String,
    pub port_start: u16,
    pub port_end: u16,
    pub process_path: Option<String>,
    pub weight: u64,
}

#[derive(Debug, Default)]
pub struct CompilationResult {
    pub filters: Vec<CompiledFilter>,
    pub errors: Vec<RuleError>,
    pub warnings: Vec<String>,
    pub skipped_count: u64,
}

/// Compile every rule in `policy`, collecting per-rule failures instead of
/// aborting on the first one (spec.md §4.3: partial-success compilation).
pub fn compile(policy: &Policy) -> CompilationResult {
    let mut result = CompilationResult::default();
    for rule in policy.ordered_rules() {
        if !rule.enabled {
            result
                .warnings
                .push(format!("rule '{}' is disabled, skipped", rule.id));
            result.skipped_count += 1;
            continue;
        }
        match compile_rule(rule) {
            Ok(mut filters) => result.filters.append(&mut filters),
            Err(e) => result.errors.push(e),
        }
    }
    result
}

/// Baseline compiler feature support (spec.md §4.4): `direction=both`,
/// `protocol=any`, the inbound+UDP combination, IPv6 networks, and any
/// `local` endpoint clause are all rejected here as a per-rule compilation
/// error rather than silently compiled or validated away.
fn unsupported_feature_reasons(rule: &Rule) -> Vec<String> {
    let mut reasons = Vec::new();

    if rule.direction == Direction::Both {
        reasons.push("direction=both is not supported by the baseline compiler".to_string());
    }
    if rule.protocol == Protocol::Any {
        reasons.push("protocol=any is not supported by the baseline compiler".to_string());
    }
    if rule.direction == Direction::Inbound && rule.protocol == Protocol::Udp {
        reasons.push("inbound+udp is not supported by the baseline compiler".to_string());
    }
    if rule.local.is_some() {
        reasons
            .push("local endpoint clauses are not supported by the baseline compiler".to_string());
    }
    if matches!(
        rule.remote.network.parse::<IpNetwork>(),
        Ok(IpNetwork::V6(_))
    ) {
        reasons.push("IPv6 networks are not supported by the baseline compiler".to_string());
    }

    reasons
}

fn compile_rule(rule: &Rule) -> Result<Vec<CompiledFilter>, RuleError> {
    let reasons = unsupported_feature_reasons(rule);
    if !reasons.is_empty() {
        return Err(RuleError::new(rule.id.clone(), reasons.join("; ")));
    }

    let network = rule.remote.network.clone();
    let weight = BASE_WEIGHT + rule.priority.max(0) as u64;

    let ranges: Vec<(u16, u16)> = if rule.remote.ports.is_empty() {
        vec![(0, u16::MAX)]
    } else {
        rule.remote.ports.iter().map(PortSpec::bounds).collect()
    };

    let mut filters = Vec::with_capacity(ranges.len());
    for (idx, (start, end)) in ranges.into_iter().enumerate() {
        if start > end {
            return Err(RuleError::new(
                rule.id.clone(),
                format!("port range {start}-{end} is inverted"),
            ));
        }
        let filter_key = filter_key(
            &rule.id,
            idx as u32,
            rule.action,
            rule.protocol,
            rule.direction,
            &network,
            start,
            end,
            rule.process_path.as_deref(),
        );
        filters.push(CompiledFilter {
            filter_key,
            rule_id: rule.id.clone(),
            direction: rule.direction,
            protocol: rule.protocol,
            action: rule.action,
            network: network.clone(),
            port_start: start,
            port_end: end,
            process_path: rule.process_path.clone(),
            weight,
        });
    }
    Ok(filters)
}

/// Derive a stable 128-bit filter key as a pure function of every field that
/// determines kernel filter identity. Two rules that would produce the same
/// kernel filter always produce the same key, and any change to a
/// significant field changes it.
///
/// Built as SHA-256(canonical tuple) truncated to 128 bits, then forced into
/// an RFC 4122 v4/variant-1 shape purely so the bytes always look like a
/// conventional UUID when printed -- the value is not used as a random UUID,
/// only as a fixed-width deterministic key.
#[allow(clippy::too_many_arguments)]
pub fn filter_key(
    rule_id: &str,
    port_index: u32,
    action: Action,
    protocol: Protocol,
    direction: Direction,
    network: &str,
    port_start: u16,
    port_end: u16,
    process_path: Option<&str>,
) -> u128 {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(port_index.to_le_bytes());
    hasher.update([action as u8, protocol as u8, direction as u8]);
    hasher.update(network.as_bytes());
    hasher.update([0u8]);
    hasher.update(port_start.to_le_bytes());
    hasher.update(port_end.to_le_bytes());
    if let Some(p) = process_path {
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[0..16]);

    // Force version nibble (byte 6 high nibble) to 4 and variant bits
    // (byte 8 top two bits) to 10, per RFC 4122 §4.4.
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    u128::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EndpointFilter;
    use chrono::Utc;

    fn rule(id: &str, priority: i32) -> Rule {
        Rule {
            id: id.into(),
            direction: Direction::Outbound,
            protocol: Protocol::Tcp,
            action: Action::Allow,
            remote: EndpointFilter {
                network: "10.0.0.0/8".into(),
                ports: vec![PortSpec::Single(443)],
            },
            local: None,
            process_path: None,
            priority,
            enabled: true,
            comment: None,
        }
    }

    fn policy(rules: Vec<Rule>) -> Policy {
        Policy {
            version: "1.0.0".into(),
            default_action: Action::Allow,
            updated_at: Utc::now(),
            rules,
        }
    }

    #[test]
    fn filter_key_is_deterministic() {
        let a = filter_key(
            "r1",
            0,
            Action::Allow,
            Protocol::Tcp,
            Direction::Outbound,
            "10.0.0.0/8",
            443,
            443,
            None,
        );
        let b = filter_key(
            "r1",
            0,
            Action::Allow,
            Protocol::Tcp,
            Direction::Outbound,
            "10.0.0.0/8",
            443,
            443,
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn filter_key_changes_with_any_significant_field() {
        let base = filter_key(
            "r1",
            0,
            Action::Allow,
            Protocol::Tcp,
            Direction::Outbound,
            "10.0.0.0/8",
            443,
            443,
            None,
        );
        let different_action = filter_key(
            "r1",
            0,
            Action::Block,
            Protocol::Tcp,
            Direction::Outbound,
            "10.0.0.0/8",
            443,
            443,
            None,
        );
        assert_ne!(base, different_action);
    }

    #[test]
    fn filter_key_has_rfc4122_shape() {
        let key = filter_key(
            "r1",
            0,
            Action::Allow,
            Protocol::Tcp,
            Direction::Outbound,
            "10.0.0.0/8",
            443,
            443,
            None,
        );
        let bytes = key.to_be_bytes();
        assert_eq!(bytes[6] >> 4, 4);
        assert_eq!(bytes[8] >> 6, 0b10);
    }

    #[test]
    fn compile_produces_one_filter_per_rule_without_ports() {
        let mut r = rule("r1", 0);
        r.remote.ports.clear();
        let result = compile(&policy(vec![r]));
        assert_eq!(result.filters.len(), 1);
        assert_eq!(result.filters[0].port_start, 0);
        assert_eq!(result.filters[0].port_end, u16::MAX);
    }

    #[test]
    fn compile_reports_inverted_range_as_rule_error_not_panic() {
        let mut r = rule("r1", 0);
        r.remote.ports = vec![PortSpec::Range { start: 500, end: 1 }];
        let result = compile(&policy(vec![r]));
        assert!(result.filters.is_empty());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn weight_is_base_plus_nonnegative_priority() {
        let result = compile(&policy(vec![rule("r1", 250)]));
        assert_eq!(result.filters[0].weight, BASE_WEIGHT + 250);
    }

    #[test]
    fn negative_priority_never_drops_below_base_weight() {
        let result = compile(&policy(vec![rule("r1", -500)]));
        assert_eq!(result.filters[0].weight, BASE_WEIGHT);
    }

    #[test]
    fn disabled_rule_is_skipped_with_warning() {
        let mut r = rule("r1", 0);
        r.enabled = false;
        let result = compile(&policy(vec![r]));
        assert!(result.filters.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn direction_both_is_a_compilation_error_other_rules_still_compile() {
        let mut both = rule("r1", 0);
        both.direction = Direction::Both;
        let ok = rule("r2", 0);
        let result = compile(&policy(vec![both, ok]));
        assert_eq!(result.filters.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].rule_id, "r1");
        assert!(result.errors[0].message.contains("direction=both"));
    }

    #[test]
    fn protocol_any_is_a_compilation_error() {
        let mut r = rule("r1", 0);
        r.protocol = Protocol::Any;
        let result = compile(&policy(vec![r]));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("protocol=any"));
    }

    #[test]
    fn inbound_udp_is_a_compilation_error() {
        let mut r = rule("r1", 0);
        r.direction = Direction::Inbound;
        r.protocol = Protocol::Udp;
        let result = compile(&policy(vec![r]));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("inbound+udp"));
    }

    #[test]
    fn local_endpoint_clause_is_a_compilation_error() {
        let mut r = rule("r1", 0);
        r.local = Some(EndpointFilter {
            network: "127.0.0.1/32".into(),
            ports: vec![],
        });
        let result = compile(&policy(vec![r]));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("local endpoint"));
    }

    #[test]
    fn ipv6_network_is_a_compilation_error() {
        let mut r = rule("r1", 0);
        r.remote.network = "::/0".into();
        let result = compile(&policy(vec![r]));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("IPv6"));
    }

    #[test]
    fn multiple_unsupported_features_accumulate_into_one_error() {
        let mut r = rule("r1", 0);
        r.direction = Direction::Both;
        r.protocol = Protocol::Any;
        let result = compile(&policy(vec![r]));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("direction=both"));
        assert!(result.errors[0].message.contains("protocol=any"));
    }
}
