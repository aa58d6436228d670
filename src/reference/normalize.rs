use crate::LedgerError;
use url::Url;

/// Query parameters that never change the referenced document
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Normalizes a reference before it is used as a store key
///
/// HTTP(S) references are parsed and canonicalized:
/// - host lowercased (done by the parser), dot segments resolved
/// - fragment removed
/// - tracking query parameters (`utm_*`, `fbclid`, ...) removed
/// - remaining query parameters sorted by key
///
/// Anything else (file paths, database ids, ...) is only trimmed, since a
/// reference is an opaque identifier to the rest of the crate.
///
/// # Errors
///
/// `LedgerError::InvalidReference` for an empty reference, `UrlParse` for a
/// malformed HTTP(S) URL.
///
/// # Examples
///
/// ```
/// use sumi_ledger::reference::normalize_reference;
///
/// let reference = normalize_reference("https://Example.COM/a/../b#top").unwrap();
/// assert_eq!(reference, "https://example.com/b");
/// ```
pub fn normalize_reference(reference: &str) -> Result<String, LedgerError> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidReference(reference.to_string()));
    }

    if !is_http_reference(trimmed) {
        return Ok(trimmed.to_string());
    }

    let mut url = Url::parse(trimmed)?;
    if url.host_str().is_none() {
        return Err(LedgerError::InvalidReference(reference.to_string()));
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url.to_string())
}

fn is_http_reference(reference: &str) -> bool {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
