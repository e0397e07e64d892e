//! Loop prevention.
//!
//! A proxy that forwards to its own listener recurses until it runs out of
//! sockets. Before every outbound call the target is resolved and compared
//! with the addresses the proxy listens on. Only hosts in the management
//! allowlist may reach the proxy itself.

use arc_swap::ArcSwap;
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a forward was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Request to {host}:{port} would loop back into this proxy")]
pub struct LoopDetected {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Default)]
struct Addresses {
    listening: BTreeSet<SocketAddr>,
    local_ips: BTreeSet<IpAddr>,
}

impl Addresses {
    fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.listening.iter().map(SocketAddr::port)
    }

    /// Whether `ip` is one of the proxy's own addresses. Listeners on the
    /// unspecified address answer on loopback and every local address.
    fn is_own_ip(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        if ip.is_loopback() || ip.is_unspecified() || self.local_ips.contains(&ip) {
            return true;
        }
        self.listening.iter().any(|addr| canonical(addr.ip()) == ip)
    }

    fn is_own(&self, addr: SocketAddr) -> bool {
        self.listening.iter().any(|listener| {
            listener.port() == addr.port()
                && (listener.ip().is_unspecified() && self.is_own_ip(addr.ip())
                    || canonical(listener.ip()) == canonical(addr.ip())
                    || canonical(addr.ip()).is_loopback() && canonical(listener.ip()).is_loopback())
        })
    }
}

/// Refreshable view of where the proxy is listening.
#[derive(Debug, Default)]
pub struct LoopGuard {
    addresses: ArcSwap<Addresses>,
    allowed_hosts: ArcSwap<BTreeSet<String>>,
}

impl LoopGuard {
    pub fn new<I, S>(allowed_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let guard = Self::default();
        guard.set_allowed_hosts(allowed_hosts);
        guard
    }

    /// Replace the management allowlist.
    pub fn set_allowed_hosts<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|host| host.as_ref().trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        self.allowed_hosts.store(Arc::new(hosts));
    }

    /// Record an address the proxy accepts connections on.
    pub fn register(&self, addr: SocketAddr) {
        self.addresses.rcu(|current| {
            let mut listening = current.listening.clone();
            listening.insert(addr);
            Arc::new(Addresses {
                listening,
                local_ips: current.local_ips.clone(),
            })
        });
        debug!("Loop guard watching {}", addr);
    }

    /// Add addresses of local interfaces, used to expand listeners bound to
    /// the unspecified address.
    pub fn add_local_ips<I: IntoIterator<Item = IpAddr>>(&self, ips: I) {
        let ips: Vec<IpAddr> = ips.into_iter().map(canonical).collect();
        if ips.iter().all(|ip| self.addresses.load().local_ips.contains(ip)) {
            return;
        }
        self.addresses.rcu(|current| {
            let mut local_ips = current.local_ips.clone();
            local_ips.extend(ips.iter().copied());
            Arc::new(Addresses {
                listening: current.listening.clone(),
                local_ips,
            })
        });
    }

    /// Forget every registered listener and local address.
    pub fn clear(&self) {
        self.addresses.store(Arc::new(Addresses::default()));
    }

    pub fn listening(&self) -> Vec<SocketAddr> {
        self.addresses.load().listening.iter().copied().collect()
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .load()
            .contains(&host.trim().to_ascii_lowercase())
    }

    /// Whether `host` names this machine, without any DNS lookup.
    pub fn is_local_host(&self, host: &str) -> bool {
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => self.addresses.load().is_own_ip(ip),
            Err(_) => false,
        }
    }

    /// Refuse a call to `host:port` when it resolves to one of our listeners.
    ///
    /// Names that fail to resolve pass; the connect attempt reports them.
    pub async fn check(&self, host: &str, port: u16) -> Result<(), LoopDetected> {
        if self.is_allowed(host) {
            return Ok(());
        }
        let addresses = self.addresses.load_full();
        if !addresses.ports().any(|listening| listening == port) {
            return Ok(());
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        let resolved: Vec<SocketAddr> = match bare.parse::<IpAddr>() {
            Ok(ip) => vec![SocketAddr::new(ip, port)],
            Err(_) => match tokio::net::lookup_host((bare, port)).await {
                Ok(addrs) => addrs.collect(),
                Err(e) => {
                    debug!("Loop check could not resolve {}: {}", host, e);
                    return Ok(());
                }
            },
        };

        if resolved.iter().any(|addr| addresses.is_own(*addr)) {
            warn!("Refusing to forward to {}:{}, it is this proxy", host, port);
            return Err(LoopDetected {
                host: host.to_string(),
                port,
            });
        }
        Ok(())
    }
}

/// IPv4-mapped IPv6 addresses compare as their IPv4 form.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}
