//! SRV based service discovery cache
//!
//! Lookup results are stored per service name with the smallest TTL of the
//! record set deciding when the whole set expires. Endpoint selection follows
//! the SRV rules: only the lowest priority tier is considered, and within the
//! tier endpoints are picked at random proportional to their weight.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Local};
use dashmap::DashMap;
use log::debug;
use rand::Rng;
use serde_derive::{Deserialize, Serialize};

use crate::protocol::{DnsPacket, DnsRecord};

/// A single SRV target together with any glue addresses that came with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub target: String,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub ttl: u32,
    pub addresses: Vec<IpAddr>,
    pub healthy: bool,
}

impl ServiceEndpoint {
    pub fn new(target: String, priority: u16, weight: u16, port: u16, ttl: u32) -> ServiceEndpoint {
        ServiceEndpoint {
            target,
            priority,
            weight,
            port,
            ttl,
            addresses: Vec::new(),
            healthy: true,
        }
    }
}

/// One refresh of a service: its endpoints plus the expiry bookkeeping.
#[derive(Clone, Debug)]
pub struct ServiceEntry {
    /// Sorted by priority ascending, weight descending.
    pub endpoints: Vec<ServiceEndpoint>,
    pub last_refresh: DateTime<Local>,
    pub min_ttl: u32,
}

impl ServiceEntry {
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        now > self.last_refresh + Duration::seconds(i64::from(self.min_ttl))
    }
}

/// Extract endpoints from a lookup response: one endpoint per SRV answer,
/// with A and AAAA records from any section attached as addresses.
pub fn endpoints_from_packet(packet: &DnsPacket) -> Vec<ServiceEndpoint> {
    let mut endpoints = Vec::new();

    for rec in &packet.answers {
        if let DnsRecord::Srv {
            priority,
            weight,
            port,
            ref host,
            ttl,
            ..
        } = *rec
        {
            endpoints.push(ServiceEndpoint::new(
                host.clone(),
                priority,
                weight,
                port,
                ttl.0,
            ));
        }
    }

    for rec in packet
        .answers
        .iter()
        .chain(packet.authorities.iter())
        .chain(packet.resources.iter())
    {
        let (domain, addr) = match *rec {
            DnsRecord::A {
                ref domain, addr, ..
            } => (domain, IpAddr::V4(addr)),
            DnsRecord::Aaaa {
                ref domain, addr, ..
            } => (domain, IpAddr::V6(addr)),
            _ => continue,
        };

        for endpoint in &mut endpoints {
            if endpoint.target.eq_ignore_ascii_case(domain) {
                endpoint.addresses.push(addr);
            }
        }
    }

    endpoints
}

/// Concurrent cache of discovered services, keyed by lowercased service name.
///
/// Entries are replaced wholesale on refresh; readers holding a previous
/// snapshot keep a consistent view through the `Arc`.
#[derive(Default)]
pub struct ServiceCache {
    entries: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceCache {
    pub fn new() -> ServiceCache {
        ServiceCache {
            entries: DashMap::new(),
        }
    }

    /// Install a fresh endpoint set for a service, replacing any previous
    /// entry and resetting the expiry clock.
    pub fn add_or_update(&self, service: &str, mut endpoints: Vec<ServiceEndpoint>) {
        endpoints.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.weight.cmp(&a.weight))
        });

        let min_ttl = endpoints.iter().map(|e| e.ttl).min().unwrap_or(0);

        let entry = Arc::new(ServiceEntry {
            endpoints,
            last_refresh: Local::now(),
            min_ttl,
        });

        self.entries.insert(service.to_lowercase(), entry);
    }

    /// Current endpoints for a service, or `None` when the entry is missing
    /// or expired. An expired entry is evicted on access.
    pub fn get_endpoints(&self, service: &str) -> Option<Vec<ServiceEndpoint>> {
        self.live_entry(service).map(|entry| entry.endpoints.clone())
    }

    /// Pick one endpoint for a service.
    ///
    /// Only healthy endpoints in the lowest priority tier are eligible; among
    /// those the pick is random weighted by the endpoint weight, with a
    /// uniform pick when the whole tier carries weight zero.
    pub fn select_endpoint(&self, service: &str) -> Option<ServiceEndpoint> {
        let entry = self.live_entry(service)?;

        let min_priority = entry.endpoints.iter().map(|e| e.priority).min()?;
        let candidates: Vec<&ServiceEndpoint> = entry
            .endpoints
            .iter()
            .filter(|e| e.healthy && e.priority == min_priority)
            .collect();

        if candidates.is_empty() {
            debug!("no healthy endpoint in lowest tier for {}", service);
            return None;
        }

        let mut rng = rand::thread_rng();
        let total: u32 = candidates.iter().map(|e| u32::from(e.weight)).sum();
        if total == 0 {
            return Some(candidates[rng.gen_range(0, candidates.len())].clone());
        }

        let mut draw = rng.gen_range(0, total);
        for endpoint in &candidates {
            let weight = u32::from(endpoint.weight);
            if draw < weight {
                return Some((*endpoint).clone());
            }
            draw -= weight;
        }

        // Unreachable because draw < total, but do not panic over it.
        candidates.last().map(|e| (*e).clone())
    }

    /// Exclude a target from selection until the next refresh of the service.
    pub fn mark_unhealthy(&self, service: &str, target: &str) {
        let key = service.to_lowercase();

        if let Some(mut guard) = self.entries.get_mut(&key) {
            let last_refresh = guard.last_refresh;
            let min_ttl = guard.min_ttl;

            let endpoints = guard
                .endpoints
                .iter()
                .map(|e| {
                    let mut e = e.clone();
                    if e.target.eq_ignore_ascii_case(target) {
                        e.healthy = false;
                    }
                    e
                })
                .collect();

            *guard = Arc::new(ServiceEntry {
                endpoints,
                last_refresh,
                min_ttl,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_entry(&self, service: &str) -> Option<Arc<ServiceEntry>> {
        let key = service.to_lowercase();

        {
            if let Some(entry) = self.entries.get(&key) {
                if !entry.is_expired(Local::now()) {
                    return Some(entry.clone());
                }
            }
        }

        // The guard above is released; evict only if still expired.
        self.entries.remove_if(&key, |_, e| e.is_expired(Local::now()));

        None
    }
}
