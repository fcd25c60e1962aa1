//! DN scrubbing for log output.
//!
//! Distinguished names identify people; under `log = network` the values of
//! the naming attributes `cn`, `dc`, `ou` and `uid` are redacted before a DN
//! is handed to the log sink. All logging of DNs goes through this module so
//! the sink never has to sanitize.

use crate::config::LogMode;

const REDACTED: &str = "xxxx";

/// RDN types whose values are redacted under `log = network`.
const SENSITIVE_RDN_TYPES: &[&str] = &["cn", "dc", "ou", "uid"];

/// Scrubs `dn` according to the configured log mode.
///
/// `network` partially redacts; every other mode returns the DN verbatim
/// (`network_unsafe` deliberately so, and the non-network modes never log
/// wire-level detail in the first place).
pub fn dn(dn: &str, mode: LogMode) -> String {
    match mode {
        LogMode::Network => scrub(dn),
        _ => dn.to_string(),
    }
}

/// Unconditionally scrubs a DN. Idempotent.
pub fn scrub(dn: &str) -> String {
    split_rdns(dn)
        .iter()
        .map(|rdn| scrub_rdn(rdn))
        .collect::<Vec<_>>()
        .join(",")
}

fn scrub_rdn(rdn: &str) -> String {
    match rdn.split_once('=') {
        Some((attr_type, _)) if is_sensitive(attr_type.trim()) => {
            format!("{}={}", attr_type.trim(), REDACTED)
        }
        Some(_) => rdn.to_string(),
        // Malformed component: redact it entirely.
        None => REDACTED.to_string(),
    }
}

fn is_sensitive(attr_type: &str) -> bool {
    SENSITIVE_RDN_TYPES
        .iter()
        .any(|t| attr_type.eq_ignore_ascii_case(t))
}

/// Splits a DN into RDN components, honoring escaped commas.
fn split_rdns(dn: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in dn.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == ',' {
            result.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() || !result.is_empty() {
        result.push(current.trim().to_string());
    }

    result
}
