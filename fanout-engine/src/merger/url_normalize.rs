//! URL canonicalisation for the normalised-URL dedup stage.
//!
//! Equivalent pages that differ only in scheme/host case, default port,
//! trailing slash, parameter order, tracking parameters, or fragment
//! compare equal after [`normalize_url`].

use url::Url;

/// Query parameters that never change page content.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "igshid",
    "ref",
    "ref_src",
    "si",
    "feature",
];

/// Canonical form of `raw`, or `raw` unchanged if it does not parse.
///
/// ```
/// use fanout_engine::merger::normalize_url;
///
/// let a = normalize_url("https://Example.COM:443/docs/?b=2&a=1&utm_source=x#intro");
/// let b = normalize_url("https://example.com/docs?a=1&b=2");
/// assert_eq!(a, b);
/// ```
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw.trim()) else {
        return raw.to_owned();
    };

    parsed.set_fragment(None);

    if matches!(
        (parsed.scheme(), parsed.port()),
        ("http", Some(80)) | ("https", Some(443))
    ) {
        let _ = parsed.set_port(None);
    }

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if params.is_empty() {
        parsed.set_query(None);
    } else {
        params.sort();
        parsed.query_pairs_mut().clear().extend_pairs(params);
    }

    let path = parsed.path().to_owned();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    // Url::parse lowercases scheme and host already.
    parsed.to_string()
}

/// Host without a leading `www.`, lowercased.
pub fn host_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_owned).unwrap_or(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host_only() {
        assert_eq!(normalize_url("HTTPS://Example.COM/Path"), "https://example.com/Path");
    }

    #[test]
    fn strips_trailing_slashes_but_keeps_root() {
        assert_eq!(normalize_url("https://example.com/path//"), "https://example.com/path");
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn drops_default_ports_only() {
        assert_eq!(normalize_url("http://example.com:80/a"), "http://example.com/a");
        assert_eq!(normalize_url("https://example.com:8443/a"), "https://example.com:8443/a");
    }

    #[test]
    fn sorts_params_and_strips_tracking() {
        assert_eq!(
            normalize_url("https://example.com/s?z=1&UTM_Source=feed&a=2&fbclid=abc"),
            "https://example.com/s?a=2&z=1"
        );
        assert_eq!(
            normalize_url("https://example.com/page?utm_medium=x&gclid=y"),
            "https://example.com/page"
        );
    }

    #[test]
    fn removes_fragment() {
        assert_eq!(normalize_url("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn unparseable_input_unchanged() {
        assert_eq!(normalize_url("not a url"), "not a url");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn host_strips_www() {
        assert_eq!(host_of("https://WWW.Nature.com/articles/1"), Some("nature.com".into()));
        assert_eq!(host_of("nope"), None);
    }
}
