//! Structural validation of a [`Policy`] prior to compilation.
//!
//! Validation catches malformed documents (bad CIDR, invalid version, port
//! range inversions, duplicate rule IDs) before they ever reach the
//! compiler; compilation failures are reserved for per-rule, compiler-
//! limitation problems instead (spec.md §4.3).

use std::collections::HashSet;
use std::sync::OnceLock;

use ipnetwork::IpNetwork;
use regex::Regex;

use portcullis_shared::errors::{FieldError, PortcullisError, PortcullisResult};

use super::model::{Policy, PortSpec, Rule};

/// Cheap, imprecise reject threshold checked before the precise byte-count
/// hard limit (spec.md §4.3 step 1). Generous relative to the hard limit so
/// it only catches input that is absurdly oversized.
pub const MAX_POLICY_CHARS: usize = 4 * 1024 * 1024;

const SEMVER_PATTERN: &str = r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$";

fn semver_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SEMVER_PATTERN).expect("semver pattern is valid"))
}

/// Parse and validate raw policy bytes in one pass (spec.md §4.3: "the
/// validator exposes a combined entry point ... so callers do not parse
/// twice").
///
/// Pipeline: cheap character-count reject, precise byte-count hard limit,
/// structural parse, then semantic validation.
pub fn validate_raw(raw: &str, max_bytes: u64) -> PortcullisResult<Policy> {
    if raw.chars().count() > MAX_POLICY_CHARS {
        return Err(PortcullisError::ValidationFailed(vec![FieldError::new(
            "",
            "policy text exceeds the maximum accepted character count",
        )]));
    }

    if raw.len() as u64 > max_bytes {
        return Err(PortcullisError::ValidationFailed(vec![FieldError::new(
            "",
            format!("policy exceeds the maximum accepted size of {max_bytes} bytes"),
        )]));
    }

    let policy: Policy = serde_json::from_str(raw).map_err(|e| {
        PortcullisError::ValidationFailed(vec![FieldError::new(
            "",
            format!("malformed policy JSON: {e}"),
        )])
    })?;

    validate(&policy)?;
    Ok(policy)
}

/// Validate a policy document, returning every violation found rather than
/// bailing out on the first one.
pub fn validate(policy: &Policy) -> PortcullisResult<()> {
    let mut errors = Vec::new();

    if !semver_re().is_match(&policy.version) {
        errors.push(FieldError::new(
            "version",
            "Invalid version format, expected MAJOR.MINOR.PATCH[-pre][+build]",
        ));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for (idx, rule) in policy.rules.iter().enumerate() {
        validate_rule(idx, rule, &mut errors);
        if !seen_ids.insert(rule.id.as_str()) {
            errors.push(FieldError::new(
                format!("rules[{idx}].id"),
                format!("duplicate rule id '{}'", rule.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PortcullisError::ValidationFailed(errors))
    }
}

fn validate_rule(idx: usize, rule: &Rule, errors: &mut Vec<FieldError>) {
    let path = format!("rules[{idx}]");

    if rule.id.trim().is_empty() {
        errors.push(FieldError::new(format!("{path}.id"), "must not be empty"));
    }

    validate_endpoint(&format!("{path}.remote"), &rule.remote.network, errors);
    validate_ports(&format!("{path}.remote.ports"), &rule.remote.ports, errors);

    if let Some(local) = &rule.local {
        validate_endpoint(&format!("{path}.local"), &local.network, errors);
        validate_ports(&format!("{path}.local.ports"), &local.ports, errors);
    }

    if let Some(path_str) = &rule.process_path {
        if !path_str.starts_with('/') {
            errors.push(FieldError::new(
                format!("{path}.process_path"),
                "must be an absolute path",
            ));
        }
        if path_str.contains("..") {
            errors.push(FieldError::new(
                format!("{path}.process_path"),
                "must not contain '..' traversal",
            ));
        }
    }
}

fn validate_endpoint(path: &str, network: &str, errors: &mut Vec<FieldError>) {
    match network.parse::<IpNetwork>() {
        Ok(IpNetwork::V4(_)) => {}
        Ok(IpNetwork::V6(_)) => {
            errors.push(FieldError::new(
                format!("{path}.network"),
                format!("'{network}' is an IPv6 network, which is out of scope"),
            ));
        }
        Err(_) => {
            errors.push(FieldError::new(
                format!("{path}.network"),
                format!("'{network}' is not a valid CIDR network"),
            ));
        }
    }
}

fn validate_ports(path: &str, ports: &[PortSpec], errors: &mut Vec<FieldError>) {
    for (p_idx, port) in ports.iter().enumerate() {
        let (start, end) = port.bounds();
        if start == 0 || end == 0 {
            errors.push(FieldError::new(
                format!("{path}[{p_idx}]"),
                "port 0 is not a valid port",
            ));
        }
        if start > end {
            errors.push(FieldError::new(
                format!("{path}[{p_idx}]"),
                format!("range start {start} is greater than end {end}"),
            ));
        }
    }
}
