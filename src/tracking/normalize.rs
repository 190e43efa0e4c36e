//! Page URL and referrer normalization.

use url::Url;

use crate::models::Utm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    pub path: String,
    pub query: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referrer {
    pub path: Option<String>,
    pub query: Option<String>,
    /// Host with any leading `www.` removed
    pub domain: String,
}

/// Lowercase a hostname and strip a leading `www.`
pub fn strip_www(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

fn normalize_path(path: &str, remove_trailing_slash: bool) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if remove_trailing_slash && path.len() > 1 {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return "/".to_string();
        }
        return trimmed.to_string();
    }
    path.to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn parse_page(raw: &str, hostname: Option<&str>) -> Option<Url> {
    if let Ok(url) = Url::parse(raw) {
        if url.has_host() {
            return Some(url);
        }
    }

    // Relative URL sent by the tracker script: resolve against the page host
    let host = hostname.filter(|h| !h.is_empty()).unwrap_or("localhost");
    let base = Url::parse(&format!("https://{host}/")).ok()?;
    base.join(raw).ok()
}

/// Split a page URL (absolute, or path plus query) into its stored components
pub fn normalize_url(
    raw: Option<&str>,
    hostname: Option<&str>,
    remove_trailing_slash: bool,
) -> PageUrl {
    let hostname = hostname.map(str::trim).filter(|h| !h.is_empty());
    let raw = raw.map(str::trim).unwrap_or("");

    if raw.is_empty() {
        return PageUrl {
            path: "/".to_string(),
            query: None,
            hostname: hostname.map(str::to_lowercase),
        };
    }

    match parse_page(raw, hostname) {
        Some(url) => {
            let host = if Url::parse(raw).map(|u| u.has_host()).unwrap_or(false) {
                url.host_str().map(str::to_lowercase)
            } else {
                hostname.map(str::to_lowercase)
            };

            PageUrl {
                path: normalize_path(url.path(), remove_trailing_slash),
                query: non_empty(url.query()),
                hostname: host,
            }
        }
        None => {
            let (path, query) = match raw.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (raw, None),
            };
            PageUrl {
                path: normalize_path(path, remove_trailing_slash),
                query: non_empty(query),
                hostname: hostname.map(str::to_lowercase),
            }
        }
    }
}

/// Parse an absolute referrer. Self-referrals (same site as the page) and
/// unparseable values yield `None`.
pub fn normalize_referrer(raw: Option<&str>, page_hostname: Option<&str>) -> Option<Referrer> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    let url = Url::parse(raw).ok()?;
    let domain = strip_www(url.host_str()?);

    if let Some(page) = page_hostname {
        if strip_www(page) == domain {
            return None;
        }
    }

    Some(Referrer {
        path: non_empty(Some(url.path())).filter(|p| p.as_str() != "/"),
        query: non_empty(url.query()),
        domain,
    })
}

/// UTM parameters carried in a page query string
pub fn utm_from_query(query: Option<&str>) -> Utm {
    let mut utm = Utm::default();
    let Some(query) = query else {
        return utm;
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        let slot = match key.as_ref() {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            "utm_term" => &mut utm.term,
            "utm_content" => &mut utm.content,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    utm
}
