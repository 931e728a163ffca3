use crate::diff::diff;
use std::collections::{
    BTreeMap,
    BTreeSet,
};

/// What we last exposed for a hostname, and which Ingress asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInformation {
    pub namespace: String,
    pub hostname: String,
    pub ingress_name: String,
    /// Set when the owning Ingress carries the tunnel name annotation.
    pub discoverable_by_cf: bool,
}

impl HostInformation {
    pub fn owner(&self) -> IngressOwner<'_> {
        IngressOwner {
            namespace: &self.namespace,
            name: &self.ingress_name,
        }
    }
}

/// Identifies the Ingress that declared a set of hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IngressOwner<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
}

impl std::fmt::Display for IngressOwner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Volatile hostname -> [`HostInformation`] map. Holds at most one entry per hostname, the last writer wins.
///
/// Entries are kept sorted by hostname so that everything derived from the cache (e.g. the tunnel ingress list) is
/// stable across events.
#[derive(Debug, Default)]
pub struct HostCache {
    hosts: BTreeMap<String, HostInformation>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, entry: HostInformation) {
        info!(hostname = %entry.hostname, owner = %entry.owner(), "add host to cache");
        self.hosts.insert(entry.hostname.clone(), entry);
    }

    pub fn get(&self, hostname: &str) -> Option<&HostInformation> {
        self.hosts.get(hostname)
    }

    pub fn remove(&mut self, hostname: &str) {
        if self.hosts.remove(hostname).is_some() {
            info!(?hostname, "remove host from cache");
        }
    }

    pub fn all_entries(&self) -> impl Iterator<Item = &HostInformation> {
        self.hosts.values()
    }

    pub fn discoverable_entries(&self) -> impl Iterator<Item = &HostInformation> {
        self.all_entries().filter(|entry| entry.discoverable_by_cf)
    }

    pub fn entries_for_owner<'a>(&'a self, owner: IngressOwner<'a>) -> impl Iterator<Item = &'a HostInformation> {
        self.all_entries().filter(move |entry| entry.owner() == owner)
    }

    /// Every Ingress that owns at least one cached hostname.
    pub fn owners(&self) -> BTreeSet<IngressOwner<'_>> {
        self.all_entries().map(HostInformation::owner).collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Makes `desired` the complete set of entries owned by `owner`.
    ///
    /// Every desired entry is written (picking up changed metadata for hostnames that stay), and hostnames the owner
    /// held before but no longer declares are dropped. Entries of other owners are not touched, unless a desired
    /// hostname takes one of them over.
    pub fn replace_for_owner(&mut self, owner: IngressOwner<'_>, desired: Vec<HostInformation>) {
        let previous: Vec<String> = self
            .entries_for_owner(owner)
            .map(|entry| entry.hostname.clone())
            .collect();
        let next: Vec<String> = desired.iter().map(|entry| entry.hostname.clone()).collect();
        let changes = diff(&previous, &next);

        debug!(
            %owner,
            added = ?changes.added,
            removed = ?changes.removed,
            same = ?changes.same,
            "replacing cached hosts"
        );

        for entry in desired {
            self.put(entry);
        }
        for hostname in &changes.removed {
            self.remove(hostname);
        }
    }
}
