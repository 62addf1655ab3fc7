//! URL checks for auth flows: open-redirect protection and cookie domains.

use url::{Host, ParseError, Url};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RedirectError {
    #[error("invalid redirect URL: {0}")]
    InvalidRedirect(String),

    #[error("invalid allowed base URL: {0}")]
    InvalidBase(String),
}

/// Whether `redirect` stays on `allowed_base`'s host or one of its subdomains.
///
/// Relative paths are always safe. Protocol-relative references (`//host`)
/// are resolved against the base first, so they get the same host check as
/// absolute URLs. Subdomains must sit on a label boundary:
/// `app.example.com` passes for `example.com`, `example.com.evil.com` does
/// not.
pub fn is_safe_redirect_url(redirect: &str, allowed_base: &str) -> Result<bool, RedirectError> {
    let base = Url::parse(allowed_base).map_err(|e| RedirectError::InvalidBase(e.to_string()))?;
    let Some(allowed_host) = base.host_str() else {
        return Err(RedirectError::InvalidBase(format!("`{allowed_base}` has no host")));
    };

    let target = match Url::parse(redirect) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => {
            let first_segment = redirect.split(['/', '?', '#']).next().unwrap_or_default();
            if first_segment.contains(':') {
                return Err(RedirectError::InvalidRedirect(format!("`{redirect}` has a malformed scheme")));
            }
            if !redirect.starts_with("//") {
                return Ok(true);
            }
            base.join(redirect).map_err(|e| RedirectError::InvalidRedirect(e.to_string()))?
        }
        Err(e) => return Err(RedirectError::InvalidRedirect(e.to_string())),
    };

    Ok(target.host_str().is_some_and(|host| {
        host.eq_ignore_ascii_case(allowed_host)
            || host
                .len()
                .checked_sub(allowed_host.len() + 1)
                .is_some_and(|dot| host.as_bytes()[dot] == b'.' && host[dot + 1..].eq_ignore_ascii_case(allowed_host))
    }))
}

/// `Domain` attribute for cookies shared across a frontend's subdomains.
///
/// `None` for IP addresses, `localhost` and single-label hosts, where the
/// browser default (host-only) is the right answer.
pub fn cookie_domain(frontend_url: &str) -> Option<String> {
    let url = Url::parse(frontend_url).ok()?;
    match url.host()? {
        Host::Ipv4(_) | Host::Ipv6(_) => None,
        Host::Domain(host) if host.contains('.') && !host.ends_with("localhost") => {
            Some(if host.starts_with('.') { host.to_owned() } else { format!(".{host}") })
        }
        Host::Domain(_) => None,
    }
}
