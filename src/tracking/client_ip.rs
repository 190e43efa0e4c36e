//! Client IP extraction from forwarding headers.
//!
//! Forwarding headers are only honored in a trusted proxy mode. In standard
//! mode the `X-Forwarded-For` chain is walked right to left, skipping either a
//! fixed number of hops or any hop inside a trusted CIDR range.
//!
//! [`anonymize_ip`] is applied by the ingest pipeline before geolocation only.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

/// Resolved client address policy, with CIDR ranges parsed once at startup
#[derive(Debug, Clone)]
pub struct ClientIpExtractor {
    mode: TrustedProxyMode,
    trusted_proxies: Vec<IpNet>,
    num_trusted_proxies: Option<usize>,
}

impl ClientIpExtractor {
    pub fn new(config: &ClientIpConfig) -> Self {
        let trusted_proxies = config
            .trusted_proxies
            .iter()
            .filter_map(|cidr| match cidr.trim().parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!(cidr = %cidr, error = %e, "ignoring invalid trusted proxy range");
                    None
                }
            })
            .collect();

        Self {
            mode: config.trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies: config.num_trusted_proxies,
        }
    }

    /// The full client address. Anonymization happens later, at geolocation,
    /// so session identity keeps per-address precision.
    pub fn extract(&self, headers: &HeaderMap, socket_addr: IpAddr) -> IpAddr {
        match self.mode {
            TrustedProxyMode::Cloudflare => header_ip(headers, "cf-connecting-ip")
                .unwrap_or_else(|| {
                    warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
                    socket_addr
                }),
            TrustedProxyMode::Standard => self
                .from_forwarded_for(headers)
                .or_else(|| header_ip(headers, "x-real-ip"))
                .unwrap_or(socket_addr),
            TrustedProxyMode::None => socket_addr,
        }
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(ip))
    }

    fn from_forwarded_for(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let xff = headers.get("x-forwarded-for")?.to_str().ok()?;
        let chain: Vec<IpAddr> = xff
            .split(',')
            .filter_map(|s| s.trim().parse::<IpAddr>().ok())
            .collect();

        if chain.is_empty() {
            return None;
        }

        if let Some(hops) = self.num_trusted_proxies {
            return match chain.len().checked_sub(hops + 1) {
                Some(idx) => Some(chain[idx]),
                None => chain.first().copied(),
            };
        }

        if !self.trusted_proxies.is_empty() {
            return chain
                .iter()
                .rev()
                .find(|ip| !self.is_trusted(ip))
                .or(chain.first())
                .copied();
        }

        chain.last().copied()
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Truncate to the network prefix: /24 for IPv4, /48 for IPv6
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let [a, b, c, _] = addr.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 0))
        }
        IpAddr::V6(addr) => {
            let s = addr.segments();
            IpAddr::V6(Ipv6Addr::new(s[0], s[1], s[2], 0, 0, 0, 0, 0))
        }
    }
}
