use anyhow::{Result, anyhow};

const WILDCARD_PREFIX: &str = "*.";

/// Normalizes a certificate identifier: trims, drops the trailing dot, lower-cases and
/// converts to its ASCII (punycode) form. A leading `*.` wildcard label is preserved.
pub fn normalize_identifier(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    match trimmed.strip_prefix(WILDCARD_PREFIX) {
        Some(base) => Ok(format!("{WILDCARD_PREFIX}{}", to_ascii(base)?)),
        None => to_ascii(trimmed),
    }
}

/// Normalizes a list of identifiers, dropping duplicates while keeping the first occurrence
/// so that the leading identifier stays first.
pub fn normalize_identifiers(domains: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
    for domain in domains {
        let value = normalize_identifier(domain)?;
        if !normalized.contains(&value) {
            normalized.push(value);
        }
    }
    if normalized.is_empty() {
        return Err(anyhow!("at least one domain is required"));
    }
    Ok(normalized)
}

/// The identifier with any wildcard label removed.
pub fn base_domain(identifier: &str) -> &str {
    identifier
        .strip_prefix(WILDCARD_PREFIX)
        .unwrap_or(identifier)
}

/// Candidate zone names for a domain, from the full name down to its two-label apex.
pub fn zone_candidates(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = base_domain(domain.trim_end_matches('.'))
        .split('.')
        .filter(|label| !label.is_empty())
        .collect();
    if labels.len() < 2 {
        return labels.iter().map(|label| label.to_string()).collect();
    }
    (0..=labels.len() - 2)
        .map(|start| labels[start..].join("."))
        .collect()
}

fn to_ascii(name: &str) -> Result<String> {
    let ascii =
        idna::domain_to_ascii(name).map_err(|err| anyhow!("invalid domain name {name}: {err}"))?;
    Ok(ascii.to_lowercase())
}
