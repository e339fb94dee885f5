//! Cluster membership: the other replicas this Alertmanager gossips with.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// What a replica advertises about itself.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeerAddress {
    /// The replica's API URL, for example `http://am-1.am-endpoints:9093`.
    pub url: String,

    /// Preferred over the host of [`Self::url`] when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_address: Option<String>,
}

impl PeerAddress {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            private_address: None,
        }
    }

    /// The gossip address of this peer: its host with the `ha_port` appended.
    ///
    /// Returns [`None`] if neither the private address nor the URL yield a host.
    pub fn cluster_address(&self, ha_port: u16) -> Option<String> {
        let host = match self.private_address.as_deref().map(str::trim) {
            Some(private_address) if !private_address.is_empty() => host_of(private_address)?,
            _ => host_of(&self.url)?,
        };
        Some(format!("{host}:{ha_port}"))
    }
}

/// Extracts the host from a URL or a bare `host[:port]`.
fn host_of(address: &str) -> Option<String> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    let url = if address.contains("://") {
        Url::parse(address).ok()?
    } else {
        Url::parse(&format!("http://{address}")).ok()?
    };
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
}

/// The replicas of this application, keyed by unit name. Ordering of joins does not matter.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeerSet {
    peers: BTreeMap<String, PeerAddress>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: impl Into<String>, address: PeerAddress) -> &mut Self {
        self.peers.insert(unit.into(), address);
        self
    }

    pub fn remove(&mut self, unit: &str) -> Option<PeerAddress> {
        self.peers.remove(unit)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Sorted, de-duplicated gossip addresses of all peers. Peers whose address cannot be
    /// parsed are skipped.
    pub fn cluster_addresses(&self, ha_port: u16) -> Vec<String> {
        let mut addresses = BTreeSet::new();
        for (unit, peer) in &self.peers {
            match peer.cluster_address(ha_port) {
                Some(address) => {
                    addresses.insert(address);
                }
                None => warn!(unit, url = peer.url, "skipping peer with unparseable address"),
            }
        }
        addresses.into_iter().collect()
    }
}

impl<U: Into<String>> FromIterator<(U, PeerAddress)> for PeerSet {
    fn from_iter<T: IntoIterator<Item = (U, PeerAddress)>>(iter: T) -> Self {
        Self {
            peers: iter
                .into_iter()
                .map(|(unit, address)| (unit.into(), address))
                .collect(),
        }
    }
}
