//! Client address resolution behind reverse proxies.
//!
//! Forwarding headers are attacker-controlled unless the socket peer is a proxy we run.
//! `x-forwarded-for` and `x-real-ip` are only read when the peer falls inside one of the
//! configured networks; otherwise the peer address is the client.

use anyhow::{Context, Result};
use axum::{extract::ConnectInfo, http::HeaderMap};
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

#[derive(Clone, Debug, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    /// No proxy is trusted: the socket peer is always the client.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse CIDR blocks such as `10.0.0.0/8`; a bare address trusts that host only.
    ///
    /// # Errors
    /// Returns an error naming the first entry that is not an address or network.
    pub fn parse<I, S>(cidrs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let networks = cidrs
            .into_iter()
            .map(|cidr| {
                let cidr = cidr.as_ref().trim();
                cidr.parse::<IpNetwork>()
                    .with_context(|| format!("Invalid trusted proxy network: {cidr}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { networks })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.networks.iter().any(|network| network.contains(ip))
    }

    /// Address of the client that sent the request.
    ///
    /// Behind a trusted peer, `x-forwarded-for` is walked from the right and the first
    /// hop that is not itself a trusted proxy wins. `x-real-ip` is used when there is no
    /// usable `x-forwarded-for`. Without a peer address nothing can be trusted.
    #[must_use]
    pub fn client_ip(
        &self,
        headers: &HeaderMap,
        connect_info: Option<&ConnectInfo<SocketAddr>>,
    ) -> Option<String> {
        let peer = connect_info.map(|ConnectInfo(addr)| canonical(addr.ip()))?;
        if !self.contains(peer) {
            return Some(peer.to_string());
        }

        let client = self
            .forwarded_for(headers)
            .or_else(|| real_ip(headers))
            .unwrap_or(peer);
        Some(client.to_string())
    }

    fn forwarded_for(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let hops: Vec<IpAddr> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|hop| hop.trim().parse::<IpAddr>().map(canonical))
            .collect::<Result<_, _>>()
            .ok()?;

        hops.iter()
            .rev()
            .find(|hop| !self.contains(**hop))
            .or_else(|| hops.first())
            .copied()
    }
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
        .map(canonical)
}

// IPv4-mapped IPv6 peers (dual-stack listeners) compare as IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(addr.parse::<SocketAddr>().unwrap())
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn untrusted_peer_ignores_forwarding_headers() {
        let proxies = TrustedProxies::parse(["10.0.0.0/8"]).unwrap();
        let mut headers = forwarded("198.51.100.77");
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.78"));

        assert_eq!(
            proxies
                .client_ip(&headers, Some(&peer("203.0.113.9:50000")))
                .as_deref(),
            Some("203.0.113.9")
        );
        assert_eq!(
            TrustedProxies::none()
                .client_ip(&headers, Some(&peer("203.0.113.9:50000")))
                .as_deref(),
            Some("203.0.113.9")
        );
    }

    #[test]
    fn trusted_peer_yields_rightmost_untrusted_hop() {
        let proxies = TrustedProxies::parse(["10.0.0.0/8", "192.168.1.5"]).unwrap();
        // The client prepended a fake hop; the proxy chain appended the real one.
        let headers = forwarded("1.1.1.1, 203.0.113.7, 192.168.1.5");

        assert_eq!(
            proxies
                .client_ip(&headers, Some(&peer("10.1.2.3:443")))
                .as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn trusted_peer_falls_back_to_real_ip_then_peer() {
        let proxies = TrustedProxies::parse(["10.0.0.0/8"]).unwrap();
        let mut headers = forwarded("garbage");
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            proxies
                .client_ip(&headers, Some(&peer("10.0.0.1:443")))
                .as_deref(),
            Some("198.51.100.2")
        );
        assert_eq!(
            proxies
                .client_ip(&HeaderMap::new(), Some(&peer("10.0.0.1:443")))
                .as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn mapped_ipv6_peer_matches_ipv4_network() {
        let proxies = TrustedProxies::parse(["10.0.0.0/8"]).unwrap();
        assert!(proxies.contains("::ffff:10.0.0.1".parse().unwrap()));
        assert_eq!(
            proxies
                .client_ip(&forwarded("203.0.113.7"), Some(&peer("[::ffff:10.0.0.1]:443")))
                .as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn missing_peer_is_unknown() {
        let proxies = TrustedProxies::parse(["0.0.0.0/0"]).unwrap();
        assert_eq!(proxies.client_ip(&forwarded("203.0.113.7"), None), None);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = TrustedProxies::parse(["10.0.0.0/8", "proxy.internal"]).unwrap_err();
        assert!(err.to_string().contains("proxy.internal"));
        assert!(TrustedProxies::parse(Vec::<String>::new()).unwrap().is_empty());
    }
}
