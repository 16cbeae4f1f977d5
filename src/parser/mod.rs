// SPDX-License-Identifier: Apache-2.0

//! Banner classification: a registry of matchers, each able to claim a
//! banner string and extract `{name, version}` from it. Dispatch tries
//! matchers in registration order and returns the first hit.
//!
//! The registry is built once (process-wide, immutable thereafter) and
//! shared behind an `Arc`, so concurrent dispatch across orchestrator tasks
//! needs no locking -- this mirrors how hipcheck's plugin registry is
//! assembled once at startup and then only ever read from worker tasks.

use std::sync::Arc;

/// The outcome of successfully parsing a banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMatch {
    pub name: String,
    pub version: Option<String>,
    pub product: Option<String>,
    pub vendor: Option<String>,
}

/// A single banner-classification rule.
pub trait BannerMatcher: Send + Sync {
    /// Human-readable name of the matcher, used in logs.
    fn name(&self) -> &str;

    /// Whether this matcher claims the given banner.
    fn matches(&self, banner: &str) -> bool;

    /// Extract `{name, version}` (and optionally product/vendor) from a
    /// banner this matcher has already claimed via [`Self::matches`].
    fn extract(&self, banner: &str) -> Option<ServiceMatch>;
}

/// Ordered registry of matchers, consulted by [`Dispatch::dispatch`].
pub struct Dispatch {
    matchers: Arc<[Box<dyn BannerMatcher>]>,
}

impl Dispatch {
    pub fn new(matchers: Vec<Box<dyn BannerMatcher>>) -> Self {
        Self {
            matchers: matchers.into(),
        }
    }

    /// Build the default registry: SSH, HTTP `Server:` header, FTP, SMTP,
    /// Redis.
    pub fn with_builtin_matchers() -> Self {
        Self::new(vec![
            Box::new(SshMatcher),
            Box::new(HttpServerMatcher),
            Box::new(FtpMatcher),
            Box::new(SmtpMatcher),
            Box::new(RedisMatcher),
        ])
    }

    /// Run registered matchers in order and return the first match.
    pub fn dispatch(&self, banner: &str) -> Option<ServiceMatch> {
        self.matchers
            .iter()
            .find(|m| m.matches(banner))
            .and_then(|m| m.extract(banner))
    }
}

impl Clone for Dispatch {
    fn clone(&self) -> Self {
        Self {
            matchers: Arc::clone(&self.matchers),
        }
    }
}

/// SSH banners look like `SSH-2.0-OpenSSH_8.9p1`.
struct SshMatcher;

impl BannerMatcher for SshMatcher {
    fn name(&self) -> &str {
        "ssh"
    }

    fn matches(&self, banner: &str) -> bool {
        banner.starts_with("SSH-")
    }

    fn extract(&self, banner: &str) -> Option<ServiceMatch> {
        let rest = banner.strip_prefix("SSH-")?;
        let mut parts = rest.splitn(3, '-');
        let _protocol_version = parts.next()?;
        let software = parts.next()?;
        let (product, version) = match software.split_once('_') {
            Some((p, v)) => (p.to_string(), v.trim().to_string()),
            None => (software.trim().to_string(), String::new()),
        };
        Some(ServiceMatch {
            name: "ssh".to_string(),
            version: if version.is_empty() {
                None
            } else {
                Some(version)
            },
            product: Some(product),
            vendor: None,
        })
    }
}

/// HTTP responses carrying a `Server:` header, e.g.
/// `HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\n\r\n`.
struct HttpServerMatcher;

impl BannerMatcher for HttpServerMatcher {
    fn name(&self) -> &str {
        "http-server-header"
    }

    fn matches(&self, banner: &str) -> bool {
        banner.starts_with("HTTP/") && find_header(banner, "Server").is_some()
    }

    fn extract(&self, banner: &str) -> Option<ServiceMatch> {
        let value = find_header(banner, "Server")?;
        let (product, version) = match value.split_once('/') {
            Some((p, v)) => (p.to_string(), Some(v.to_string())),
            None => (value.to_string(), None),
        };
        Some(ServiceMatch {
            name: product.to_lowercase(),
            version,
            product: Some(product),
            vendor: None,
        })
    }
}

/// FTP banners look like `220 (vsFTPd 3.0.5)` or `220 ProFTPD 1.3.5 Server`.
struct FtpMatcher;

impl BannerMatcher for FtpMatcher {
    fn name(&self) -> &str {
        "ftp"
    }

    fn matches(&self, banner: &str) -> bool {
        banner.starts_with("220") && banner.to_lowercase().contains("ftp")
    }

    fn extract(&self, banner: &str) -> Option<ServiceMatch> {
        Some(ServiceMatch {
            name: "ftp".to_string(),
            version: extract_version_token(banner),
            product: None,
            vendor: None,
        })
    }
}

/// SMTP banners look like `220 mail.example.com ESMTP Postfix`.
struct SmtpMatcher;

impl BannerMatcher for SmtpMatcher {
    fn name(&self) -> &str {
        "smtp"
    }

    fn matches(&self, banner: &str) -> bool {
        banner.starts_with("220") && banner.to_uppercase().contains("SMTP")
    }

    fn extract(&self, banner: &str) -> Option<ServiceMatch> {
        Some(ServiceMatch {
            name: "smtp".to_string(),
            version: None,
            product: banner
                .split_whitespace()
                .last()
                .map(|s| s.to_string())
                .filter(|s| !s.is_empty()),
            vendor: None,
        })
    }
}

/// Redis replies to an unrecognized byte stream with `-ERR ...`, but on
/// connect with no input some builds log via `INFO`-shaped text; we match
/// the common `redis_version:` substring seen in raw `INFO` dumps.
struct RedisMatcher;

impl BannerMatcher for RedisMatcher {
    fn name(&self) -> &str {
        "redis"
    }

    fn matches(&self, banner: &str) -> bool {
        banner.contains("redis_version:")
    }

    fn extract(&self, banner: &str) -> Option<ServiceMatch> {
        let version = banner
            .lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .map(|v| v.trim().to_string());
        Some(ServiceMatch {
            name: "redis".to_string(),
            version,
            product: Some("redis".to_string()),
            vendor: None,
        })
    }
}

/// Find a `Name: value` header (case-insensitive name) in a raw HTTP
/// response, trimming surrounding whitespace from the value.
fn find_header<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Pull the first `x.y` or `x.y.z`-shaped token out of a banner string.
fn extract_version_token(banner: &str) -> Option<String> {
    banner
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .find(|tok| tok.split('.').count() >= 2 && tok.chars().any(|c| c.is_ascii_digit()))
        .map(|s| s.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.').to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_classifies_nginx_http_banner() {
        let dispatch = Dispatch::with_builtin_matchers();
        let banner = "HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\n\r\n";
        let found = dispatch.dispatch(banner).unwrap();
        assert_eq!(found.name, "nginx");
        assert_eq!(found.version.as_deref(), Some("1.18.0"));
    }

    #[test]
    fn dispatch_classifies_ssh_banner() {
        let dispatch = Dispatch::with_builtin_matchers();
        let found = dispatch.dispatch("SSH-2.0-OpenSSH_8.9p1\r\n").unwrap();
        assert_eq!(found.name, "ssh");
        assert_eq!(found.product.as_deref(), Some("OpenSSH"));
        assert_eq!(found.version.as_deref(), Some("8.9p1"));
    }

    #[test]
    fn dispatch_returns_none_for_unrecognized_banner() {
        let dispatch = Dispatch::with_builtin_matchers();
        assert!(dispatch.dispatch("garbage bytes").is_none());
    }

    #[test]
    fn dispatch_runs_matchers_in_registration_order() {
        struct AlwaysMatch(&'static str);
        impl BannerMatcher for AlwaysMatch {
            fn name(&self) -> &str {
                self.0
            }
            fn matches(&self, _banner: &str) -> bool {
                true
            }
            fn extract(&self, _banner: &str) -> Option<ServiceMatch> {
                Some(ServiceMatch {
                    name: self.0.to_string(),
                    version: None,
                    product: None,
                    vendor: None,
                })
            }
        }
        let dispatch = Dispatch::new(vec![Box::new(AlwaysMatch("first")), Box::new(AlwaysMatch("second"))]);
        assert_eq!(dispatch.dispatch("anything").unwrap().name, "first");
    }
}
