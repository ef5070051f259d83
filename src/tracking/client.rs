//! Client address resolution for click events.
//!
//! Forwarding headers are only honoured when the TCP peer is a configured
//! proxy; otherwise any client could write whatever address it likes into
//! the click log.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_governor::key_extractor::KeyExtractor;
use tower_governor::GovernorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyRule {
    Exact(IpAddr),
    Cidr(IpAddr, u8),
}

impl ProxyRule {
    fn matches(&self, ip: &IpAddr) -> bool {
        match *self {
            ProxyRule::Exact(addr) => addr == *ip,
            ProxyRule::Cidr(net, prefix) => ip_in_network(ip, &net, prefix),
        }
    }
}

/// Parsed `server.trusted_proxies`.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    rules: Vec<ProxyRule>,
}

impl TrustedProxies {
    /// Parse exact addresses (`10.0.0.1`) and CIDR ranges (`10.0.0.0/8`).
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.trim();
            let rule = match entry.split_once('/') {
                Some((net, prefix)) => {
                    let net: IpAddr = net
                        .parse()
                        .map_err(|_| format!("invalid trusted proxy network: {entry}"))?;
                    let prefix: u8 = prefix
                        .parse()
                        .map_err(|_| format!("invalid trusted proxy prefix: {entry}"))?;
                    let max = if net.is_ipv4() { 32 } else { 128 };
                    if prefix > max {
                        return Err(format!("trusted proxy prefix out of range: {entry}"));
                    }
                    ProxyRule::Cidr(net, prefix)
                }
                None => ProxyRule::Exact(
                    entry
                        .parse()
                        .map_err(|_| format!("invalid trusted proxy address: {entry}"))?,
                ),
            };
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.rules.iter().any(|r| r.matches(ip))
    }
}

fn ip_in_network(ip: &IpAddr, net: &IpAddr, prefix: u8) -> bool {
    match (ip, net) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            (u32::from(*ip) & mask) == (u32::from(*net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            (u128::from(*ip) & mask) == (u128::from(*net) & mask)
        }
        _ => false,
    }
}

/// First X-Forwarded-For hop, else X-Real-IP. Unparseable values are dropped.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Address to record for a click: the forwarded client when the peer is a
/// trusted proxy that supplied one, the peer itself otherwise.
pub fn client_ip(peer: Option<IpAddr>, headers: &HeaderMap, trusted: &TrustedProxies) -> Option<IpAddr> {
    match peer {
        Some(peer) if trusted.contains(&peer) => forwarded_ip(headers).or(Some(peer)),
        other => other,
    }
}

/// Rate-limit key: the same address `client_ip` would record, so forwarding
/// headers only shift the bucket when a trusted proxy sent them.
#[derive(Debug, Clone)]
pub struct ClientIpKeyExtractor {
    trusted: Arc<TrustedProxies>,
}

impl ClientIpKeyExtractor {
    pub fn new(trusted: Arc<TrustedProxies>) -> Self {
        Self { trusted }
    }
}

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        client_ip(peer, req.headers(), &self.trusted).ok_or(GovernorError::UnableToExtractKey)
    }
}
