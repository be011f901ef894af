//! Egress policy: CIDR deny-list and target address classification.
//!
//! Before any upstream connection is made, the target host is resolved and
//! every resolved address is tested against the deny-list. A single
//! deny-listed address fails the whole target: webhook endpoints have no
//! business resolving to loopback or RFC1918 space, and a mixed answer is
//! the classic DNS-rebinding setup.
//!
//! The resolved addresses are returned to the caller and passed down to the
//! dialer unchanged. The dialer never re-resolves; re-resolution would let a
//! rebinding attacker swap in a denied address between the policy check and
//! the connect.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use cidr::IpCidr;
use tracing::debug;

use super::error::{ProxyError, ProxyResult};

/// Timeout for resolving a target hostname.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deny-list: loopback, link-local, RFC1918, multicast, broadcast,
/// and their IPv6 equivalents.
const DEFAULT_DENY_CIDRS: &[&str] = &[
    "127.0.0.0/8",
    "169.254.0.0/16",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "224.0.0.0/4",
    "255.255.255.255/32",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

/// Why a target was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A resolved address fell inside the deny-list.
    DenyList,
    /// The hostname did not resolve (or resolution timed out).
    Resolution,
    /// The literal hostname `localhost`, refused before resolution so that
    /// an /etc/hosts override cannot smuggle it past the CIDR check.
    LocalhostLiteral,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::DenyList => write!(f, "address in deny-list"),
            DenyReason::Resolution => write!(f, "name resolution failed"),
            DenyReason::LocalhostLiteral => write!(f, "localhost is never a valid target"),
        }
    }
}

/// Egress policy shared by all connections.
///
/// Built once at startup from the configuration; read-only afterwards.
pub struct EgressPolicy {
    deny_list: Vec<IpCidr>,
    skip_deny_list: bool,
}

impl EgressPolicy {
    /// Create the policy.
    ///
    /// When `skip_deny_list` is true the classifier allows every target
    /// unconditionally. This exists for test environments where the targets
    /// genuinely live on loopback; production configs leave it off.
    pub fn new(skip_deny_list: bool) -> Self {
        let deny_list = DEFAULT_DENY_CIDRS
            .iter()
            .map(|c| IpCidr::from_str(c).expect("default deny-list CIDR is valid"))
            .collect();

        Self {
            deny_list,
            skip_deny_list,
        }
    }

    /// Whether the deny-list is being enforced.
    pub fn enforcing(&self) -> bool {
        !self.skip_deny_list
    }

    /// Test a single address against the deny-list.
    pub fn is_denied(&self, addr: &IpAddr) -> bool {
        !self.skip_deny_list && self.deny_list.iter().any(|cidr| cidr.contains(addr))
    }

    /// Resolve `host` and classify the target.
    ///
    /// Returns the resolved socket addresses on success; these must be handed
    /// to the dialer as-is. Returns `ProxyError::PolicyDenied` when the
    /// target is refused, including when resolution fails while the
    /// deny-list is enforced. With the deny-list skipped, resolution failure
    /// is a dial error instead: there is no policy to hide it behind.
    pub async fn classify(&self, host: &str, port: u16) -> ProxyResult<Vec<SocketAddr>> {
        if self.enforcing() && host.eq_ignore_ascii_case("localhost") {
            return Err(self.denied(host, DenyReason::LocalhostLiteral));
        }

        let resolved = tokio::time::timeout(RESOLVE_TIMEOUT, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| self.resolution_failure(host, "resolution timed out"))
            .and_then(|r| r.map_err(|e| self.resolution_failure(host, &e.to_string())))?;

        let addrs: Vec<SocketAddr> = resolved.collect();
        if addrs.is_empty() {
            return Err(self.resolution_failure(host, "no addresses returned"));
        }

        for addr in &addrs {
            if self.is_denied(&addr.ip()) {
                debug!("target {} resolved to denied address {}", host, addr.ip());
                return Err(self.denied(host, DenyReason::DenyList));
            }
        }

        Ok(addrs)
    }

    fn denied(&self, host: &str, reason: DenyReason) -> ProxyError {
        ProxyError::PolicyDenied {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }

    fn resolution_failure(&self, host: &str, message: &str) -> ProxyError {
        if self.enforcing() {
            self.denied(host, DenyReason::Resolution)
        } else {
            ProxyError::Dial {
                addr: host.to_string(),
                kind: super::error::DialErrorKind::Dns,
                message: message.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_loopback_denied() {
        let policy = EgressPolicy::new(false);
        assert!(policy.is_denied(&ip("127.0.0.1")));
        assert!(policy.is_denied(&ip("127.255.255.254")));
        assert!(policy.is_denied(&ip("::1")));
    }

    #[test]
    fn test_private_ranges_denied() {
        let policy = EgressPolicy::new(false);
        assert!(policy.is_denied(&ip("10.1.2.3")));
        assert!(policy.is_denied(&ip("172.16.0.1")));
        assert!(policy.is_denied(&ip("172.31.255.255")));
        assert!(policy.is_denied(&ip("192.168.1.1")));
        assert!(policy.is_denied(&ip("169.254.169.254")));
        assert!(policy.is_denied(&ip("fc00::1")));
        assert!(policy.is_denied(&ip("fe80::1")));
    }

    #[test]
    fn test_multicast_and_broadcast_denied() {
        let policy = EgressPolicy::new(false);
        assert!(policy.is_denied(&ip("224.0.0.251")));
        assert!(policy.is_denied(&ip("239.255.255.250")));
        assert!(policy.is_denied(&ip("255.255.255.255")));
        assert!(policy.is_denied(&ip("ff02::1")));
    }

    #[test]
    fn test_public_addresses_allowed() {
        let policy = EgressPolicy::new(false);
        assert!(!policy.is_denied(&ip("93.184.216.34")));
        assert!(!policy.is_denied(&ip("8.8.8.8")));
        assert!(!policy.is_denied(&ip("172.15.0.1")));
        assert!(!policy.is_denied(&ip("172.32.0.1")));
        assert!(!policy.is_denied(&ip("2606:2800:220:1:248:1893:25c8:1946")));
    }

    #[test]
    fn test_skip_flag_allows_everything() {
        let policy = EgressPolicy::new(true);
        assert!(!policy.is_denied(&ip("127.0.0.1")));
        assert!(!policy.is_denied(&ip("10.0.0.1")));
        assert!(!policy.enforcing());
    }

    #[tokio::test]
    async fn test_classify_localhost_literal() {
        let policy = EgressPolicy::new(false);
        let err = policy.classify("localhost", 80).await.unwrap_err();
        assert!(matches!(err, ProxyError::PolicyDenied { .. }));

        // Case-insensitive
        let err = policy.classify("LocalHost", 80).await.unwrap_err();
        assert!(matches!(err, ProxyError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn test_classify_loopback_literal_ip() {
        let policy = EgressPolicy::new(false);
        let err = policy.classify("127.0.0.1", 8080).await.unwrap_err();
        assert!(matches!(err, ProxyError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn test_classify_skip_allows_loopback() {
        let policy = EgressPolicy::new(true);
        let addrs = policy.classify("127.0.0.1", 8080).await.unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].port(), 8080);
    }

    #[tokio::test]
    async fn test_classify_resolution_failure_is_denial() {
        let policy = EgressPolicy::new(false);
        let err = policy
            .classify("does-not-exist.invalid", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn test_classify_resolution_failure_with_skip_is_dial_error() {
        let policy = EgressPolicy::new(true);
        let err = policy
            .classify("does-not-exist.invalid", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Dial { .. }));
    }
}
