//! Session cookies.
//!
//! Two cookies travel together: `jwt_token` carries the session and is
//! `HttpOnly`; `is_authenticated=true` is readable from JavaScript so a
//! frontend can tell it is signed in without seeing the token.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use http::header::{self, HeaderValue};
use tracing::warn;

use crate::response::Response;

pub const JWT_COOKIE_NAME: &str = "jwt_token";
pub const IS_AUTHENTICATED_COOKIE: &str = "is_authenticated";
pub const DEFAULT_COOKIE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// Adds `Secure`; set it whenever the site is served over HTTPS.
    pub secure: bool,
    /// See [`netutil::cookie_domain`](crate::netutil::cookie_domain).
    pub domain: Option<String>,
    pub ttl: Duration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self { secure: false, domain: None, ttl: DEFAULT_COOKIE_TTL }
    }
}

struct Cookie<'a> {
    name: &'a str,
    value: &'a str,
    expires: DateTime<Utc>,
    max_age: u64,
    http_only: bool,
}

impl Cookie<'_> {
    fn render(&self, opts: &CookieOptions) -> String {
        let mut out = format!(
            "{}={}; Path=/; Expires={}; Max-Age={}",
            self.name,
            self.value,
            self.expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.max_age,
        );
        if let Some(domain) = &opts.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if opts.secure {
            out.push_str("; Secure");
        }
        out.push_str("; SameSite=Lax");
        out
    }
}

fn append(response: &mut Response, cookie: &Cookie<'_>, opts: &CookieOptions) {
    match HeaderValue::from_str(&cookie.render(opts)) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!(cookie = cookie.name, error = %e, "cookie not representable as a header"),
    }
}

pub fn set_auth_cookies(response: &mut Response, token: &str, opts: &CookieOptions) {
    let expires = Utc::now() + TimeDelta::from_std(opts.ttl).unwrap_or_else(|_| TimeDelta::days(1));
    let max_age = opts.ttl.as_secs();
    for (name, value, http_only) in [(JWT_COOKIE_NAME, token, true), (IS_AUTHENTICATED_COOKIE, "true", false)] {
        append(response, &Cookie { name, value, expires, max_age, http_only }, opts);
    }
}

/// Overwrites both cookies with empty, already-expired ones.
pub fn clear_auth_cookies(response: &mut Response, opts: &CookieOptions) {
    for (name, http_only) in [(JWT_COOKIE_NAME, true), (IS_AUTHENTICATED_COOKIE, false)] {
        append(response, &Cookie { name, value: "", expires: DateTime::UNIX_EPOCH, max_age: 0, http_only }, opts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn sets_session_and_flag_cookies() {
        let mut response = Response::text("signed in");
        set_auth_cookies(&mut response, "tok", &CookieOptions::default());

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("jwt_token=tok; Path=/; Expires="));
        assert!(cookies[0].contains("; Max-Age=86400"));
        assert!(cookies[0].contains("; HttpOnly"));
        assert!(cookies[0].ends_with("; SameSite=Lax"));
        assert!(!cookies[0].contains("Secure"));

        assert!(cookies[1].starts_with("is_authenticated=true;"));
        assert!(!cookies[1].contains("HttpOnly"));
    }

    #[test]
    fn secure_and_domain_are_applied() {
        let opts = CookieOptions { secure: true, domain: Some(".example.com".into()), ..CookieOptions::default() };
        let mut response = Response::text("");
        set_auth_cookies(&mut response, "tok", &opts);

        for cookie in set_cookies(&response) {
            assert!(cookie.contains("; Domain=.example.com"), "{cookie}");
            assert!(cookie.contains("; Secure"), "{cookie}");
        }
    }

    #[test]
    fn clearing_expires_both_cookies() {
        let mut response = Response::text("");
        clear_auth_cookies(&mut response, &CookieOptions::default());

        let cookies = set_cookies(&response);
        assert_eq!(
            cookies[0],
            "jwt_token=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; HttpOnly; SameSite=Lax"
        );
        assert!(cookies[1].starts_with("is_authenticated=; "));
    }
}
