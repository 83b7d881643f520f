//! Destination address filtering.
//!
//! # Responsibilities
//! - Classify literal addresses against local and reserved ranges
//! - Resolve hostnames with a deadline
//! - Reject a host when any one of its addresses is forbidden
//!
//! # Design Decisions
//! - The resolver sits behind a trait so tests can pin answers
//! - IPv4-mapped and 6to4 IPv6 addresses are classified by their IPv4 form

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use ipnet::IpNet;

use crate::bare::BareError;
use crate::config::schema::SecurityConfig;
use crate::observability::metrics;

const FORBIDDEN_RANGES: &[&str] = &[
    // IPv4
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    // IPv6; ::/8 covers unspecified, loopback, IPv4-compatible and SIIT
    "::/8",
    "64:ff9b::/96",
    "64:ff9b:1::/48",
    "100::/8",
    "2001::/23",
    "2001:db8::/32",
    "fc00::/7",
    "fe80::/10",
    "fec0::/10",
    "ff00::/8",
];

static FORBIDDEN_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    FORBIDDEN_RANGES
        .iter()
        .filter_map(|range| range.parse().ok())
        .collect()
});

/// Whether a connection to `ip` must be refused.
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => embedded_ipv4(v6).map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    FORBIDDEN_NETS.iter().any(|net| net.contains(&ip))
}

/// IPv4 address carried by an IPv4-mapped (`::ffff:a.b.c.d`) or 6to4
/// (`2002:aabb:ccdd::/48`) address.
fn embedded_ipv4(v6: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return Some(v4);
    }
    let segments = v6.segments();
    (segments[0] == 0x2002).then(|| {
        let [a, b] = segments[1].to_be_bytes();
        let [c, d] = segments[2].to_be_bytes();
        Ipv4Addr::new(a, b, c, d)
    })
}

/// Hostname resolution used by the guard.
pub trait Resolve: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, std::io::Result<Vec<IpAddr>>>;
}

/// Resolver backed by the system's `getaddrinfo`.
#[derive(Debug, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, std::io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host, 0)).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        })
    }
}

/// Gatekeeper run before every outbound socket.
#[derive(Clone)]
pub struct SsrfGuard {
    block_local: bool,
    dns_timeout: Duration,
    resolver: Arc<dyn Resolve>,
}

impl SsrfGuard {
    pub fn new(config: &SecurityConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    pub fn with_resolver(config: &SecurityConfig, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            block_local: config.block_local,
            dns_timeout: Duration::from_secs(config.dns_timeout_secs),
            resolver,
        }
    }

    /// Check `host` (a hostname or IP literal, brackets allowed) and return
    /// the addresses it resolved to.
    pub async fn authorize(&self, host: &str) -> Result<Vec<IpAddr>, BareError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if let Ok(ip) = host.parse::<IpAddr>() {
            self.check(ip, host)?;
            return Ok(vec![ip]);
        }

        let addrs = match tokio::time::timeout(self.dns_timeout, self.resolver.resolve(host)).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                tracing::debug!(host = %host, error = %e, "DNS resolution failed");
                return Err(BareError::host_not_found(host));
            }
            Err(_) => {
                tracing::debug!(host = %host, "DNS resolution timed out");
                return Err(BareError::host_not_found(host));
            }
        };
        if addrs.is_empty() {
            return Err(BareError::host_not_found(host));
        }

        for ip in &addrs {
            self.check(*ip, host)?;
        }
        Ok(addrs)
    }

    fn check(&self, ip: IpAddr, host: &str) -> Result<(), BareError> {
        if self.block_local && is_forbidden_ip(ip) {
            tracing::warn!(host = %host, ip = %ip, "Blocked forbidden remote address");
            metrics::record_ssrf_blocked();
            return Err(BareError::forbidden_ip(format!(
                "Connecting to {host} ({ip}) is forbidden."
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfGuard")
            .field("block_local", &self.block_local)
            .field("dns_timeout", &self.dns_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bare::ErrorKind;
    use std::collections::HashMap;

    struct StaticResolver(HashMap<&'static str, Vec<IpAddr>>);

    impl Resolve for StaticResolver {
        fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, std::io::Result<Vec<IpAddr>>> {
            let answer = self.0.get(host).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such host")
            });
            Box::pin(async move { answer })
        }
    }

    struct SlowResolver;

    impl Resolve for SlowResolver {
        fn resolve<'a>(&'a self, _host: &'a str) -> BoxFuture<'a, std::io::Result<Vec<IpAddr>>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            })
        }
    }

    fn guard() -> SsrfGuard {
        let mut answers = HashMap::new();
        answers.insert("public.test", vec!["93.184.216.34".parse().unwrap()]);
        answers.insert(
            "mixed.test",
            vec!["93.184.216.34".parse().unwrap(), "10.1.2.3".parse().unwrap()],
        );
        answers.insert("empty.test", Vec::new());
        SsrfGuard::with_resolver(&SecurityConfig::default(), Arc::new(StaticResolver(answers)))
    }

    #[test]
    fn forbidden_literals() {
        for literal in [
            "10.0.0.1",
            "172.16.5.4",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.169.254",
            "224.0.0.251",
            "0.0.0.0",
            "100.64.0.1",
            "255.255.255.255",
            "::1",
            "::",
            "fe80::1",
            "fd00::1",
            "ff02::1",
            "::ffff:127.0.0.1",
            "::2",
            "::7f00:1",
            "::ffff:0:7f00:1",
            "fec0::1",
            "100::1",
            "2001::1",
            "2001:2::1",
            "64:ff9b::a00:1",
            "64:ff9b:1::a00:1",
            "2002:7f00:1::1",
            "2002:a00:1::1",
        ] {
            assert!(is_forbidden_ip(literal.parse().unwrap()), "{literal} should be forbidden");
        }
    }

    #[test]
    fn public_literals_allowed() {
        for literal in ["93.184.216.34", "1.1.1.1", "2606:4700:4700::1111", "::ffff:8.8.8.8", "2002:808:808::1", "2001:4860::8888"] {
            assert!(!is_forbidden_ip(literal.parse().unwrap()), "{literal} should be allowed");
        }
    }

    #[tokio::test]
    async fn literal_hosts_skip_resolution() {
        let guard = guard();
        assert_eq!(guard.authorize("93.184.216.34").await.unwrap().len(), 1);

        let err = guard.authorize("127.0.0.1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForbiddenIp);
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);

        let err = guard.authorize("[::1]").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForbiddenIp);
    }

    #[tokio::test]
    async fn one_bad_address_rejects_the_host() {
        let guard = guard();
        assert!(guard.authorize("public.test").await.is_ok());
        let err = guard.authorize("mixed.test").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForbiddenIp);
    }

    #[tokio::test]
    async fn resolution_failures_are_host_not_found() {
        let guard = guard();
        assert_eq!(guard.authorize("missing.test").await.unwrap_err().kind(), ErrorKind::HostNotFound);
        assert_eq!(guard.authorize("empty.test").await.unwrap_err().kind(), ErrorKind::HostNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_times_out() {
        let guard = SsrfGuard::with_resolver(&SecurityConfig::default(), Arc::new(SlowResolver));
        let err = guard.authorize("slow.test").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HostNotFound);
    }

    #[tokio::test]
    async fn block_local_can_be_disabled() {
        let config = SecurityConfig {
            block_local: false,
            ..SecurityConfig::default()
        };
        let guard = SsrfGuard::with_resolver(&config, Arc::new(StaticResolver(HashMap::new())));
        assert!(guard.authorize("127.0.0.1").await.is_ok());
    }
}
