pub mod config;
pub mod error;
pub mod stats;
pub mod types;

pub use config::{Config, PipelineOptions, Tier3Gate};
pub use error::{ErrorCategory, ProspectError};
pub use stats::BatchStats;
pub use types::*;

/// Normalize a company URL to its canonical form: scheme + host, lowercased,
/// no trailing slash, no path/query/fragment.
///
/// ```
/// assert_eq!(
///     prospect_common::normalize_company_url("https://Acme.com/about?ref=x").unwrap(),
///     "https://acme.com"
/// );
/// assert_eq!(
///     prospect_common::normalize_company_url("acme.com").unwrap(),
///     "https://acme.com"
/// );
/// ```
pub fn normalize_company_url(raw: &str) -> Result<String, ProspectError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProspectError::Validation("empty URL".to_string()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| ProspectError::Validation(format!("unparseable URL {raw}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProspectError::Validation(format!(
                "unsupported URL scheme: {other}"
            )));
        }
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ProspectError::Validation(format!("URL has no host: {raw}")))?
        .to_lowercase();
    Ok(format!("{}://{}", parsed.scheme(), host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_urls_are_validation_errors() {
        assert!(matches!(
            normalize_company_url(""),
            Err(ProspectError::Validation(_))
        ));
        assert!(matches!(
            normalize_company_url("ftp://acme.com"),
            Err(ProspectError::Validation(_))
        ));
    }

    #[test]
    fn path_and_port_are_stripped_to_host() {
        assert_eq!(
            normalize_company_url("http://acme.com/team/").unwrap(),
            "http://acme.com"
        );
    }
}
