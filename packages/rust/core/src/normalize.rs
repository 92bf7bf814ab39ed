//! Input normalization and validation of raw domain strings.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use sitesort_shared::Domain;

const MIN_DOMAIN_LEN: usize = 4;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

static RE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$").unwrap());
static RE_TLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z]{2,}$").unwrap());

/// An input entry that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDomain {
    /// The entry as submitted.
    pub domain: String,
    pub reason: String,
}

/// Outcome of normalizing a raw domain list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedInput {
    /// Valid domains, deduplicated, in first-occurrence order.
    pub valid: Vec<Domain>,
    pub rejected: Vec<RejectedDomain>,
}

/// Normalize and validate raw domain strings.
///
/// Entries are trimmed, lowercased and stripped of a leading `http://` or
/// `https://`, a leading `www.` and one trailing `/`. Invalid entries are
/// reported and never processed.
pub fn normalize_domains<I, S>(raw: I) -> NormalizedInput
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = NormalizedInput::default();

    for entry in raw {
        let entry = entry.as_ref();
        match normalize_domain(entry) {
            Ok(domain) => {
                if seen.insert(domain.clone()) {
                    out.valid.push(Domain::new(domain));
                }
            }
            Err(reason) => out.rejected.push(RejectedDomain {
                domain: entry.to_string(),
                reason,
            }),
        }
    }

    out
}

/// Normalize a single entry, returning the rejection reason on failure.
pub fn normalize_domain(raw: &str) -> Result<String, String> {
    let lowered = raw.trim().to_lowercase();
    let mut host = lowered.as_str();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = host.strip_prefix(prefix) {
            host = rest;
            break;
        }
    }
    host = host.strip_prefix("www.").unwrap_or(host);
    host = host.strip_suffix('/').unwrap_or(host);

    if host.is_empty() {
        return Err("empty domain".into());
    }
    validate_host(host)?;
    Ok(host.to_string())
}

fn validate_host(host: &str) -> Result<(), String> {
    let len = host.len();
    if !(MIN_DOMAIN_LEN..=MAX_DOMAIN_LEN).contains(&len) {
        return Err(format!(
            "invalid format: length {len} outside {MIN_DOMAIN_LEN}..={MAX_DOMAIN_LEN}"
        ));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err("invalid format: missing top-level domain".into());
    }
    if labels.iter().any(|label| label.is_empty()) {
        return Err("invalid format: empty label".into());
    }
    if let Some(label) = labels
        .iter()
        .find(|label| label.len() > MAX_LABEL_LEN || !RE_LABEL.is_match(label))
    {
        return Err(format!("invalid format: bad label '{label}'"));
    }

    let tld = labels[labels.len() - 1];
    if !RE_TLD.is_match(tld) {
        return Err(format!("invalid format: bad top-level domain '{tld}'"));
    }

    Ok(())
}
