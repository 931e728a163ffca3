//! Grouping of hostnames by the Cloudflare zone they most likely belong to.
//!
//! The root zone of a hostname is approximated by its last two labels, e.g. `app.example.com` belongs to
//! `example.com`. Multi-label public suffixes such as `co.uk` are not recognized.

/// Hostnames bucketed by root zone. Buckets keep the order in which their zone was first seen, hostnames keep the
/// order in which they were declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootZones {
    buckets: Vec<(String, Vec<String>)>,
}

impl RootZones {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|(zone, _)| zone.as_str())
    }

    pub fn hosts(&self, zone: &str) -> Option<&[String]> {
        self.buckets
            .iter()
            .find(|(name, _)| name == zone)
            .map(|(_, hosts)| hosts.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.buckets
            .iter()
            .map(|(zone, hosts)| (zone.as_str(), hosts.as_slice()))
    }

    /// All grouped hostnames, bucket by bucket.
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().flat_map(|(_, hosts)| hosts.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Returns the trailing `label.label` of `hostname`, where both labels consist of ASCII letters and digits only.
///
/// Only the alphanumeric run directly in front of the last dot is taken, so `my-site.com` yields `site.com`.
/// Hostnames whose last label is empty or not alphanumeric (`example.com.`, `*.example.co-op`) have no root zone.
pub fn root_zone(hostname: &str) -> Option<&str> {
    let (head, tld) = hostname.rsplit_once('.')?;
    if tld.is_empty() || !tld.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    let label_len = head.bytes().rev().take_while(u8::is_ascii_alphanumeric).count();
    if label_len == 0 {
        return None;
    }
    Some(&hostname[head.len() - label_len..])
}

/// Buckets `hostnames` by [`root_zone`]. Hostnames without a root zone are left out, repeated hostnames are kept
/// once.
pub fn group_by_root_zone<'a>(hostnames: impl IntoIterator<Item = &'a str>) -> RootZones {
    let mut zones = RootZones::default();
    for hostname in hostnames {
        let Some(zone) = root_zone(hostname) else {
            trace!(?hostname, "hostname has no root zone, skipping");
            continue;
        };
        match zones.buckets.iter_mut().find(|(name, _)| name == zone) {
            Some((_, hosts)) if hosts.iter().any(|host| host == hostname) => {
                trace!(?hostname, "hostname listed more than once");
            }
            Some((_, hosts)) => hosts.push(hostname.to_string()),
            None => zones.buckets.push((zone.to_string(), vec![hostname.to_string()])),
        }
    }
    zones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_last_two_labels() {
        let zones = group_by_root_zone(["a.example.com", "b.example.com", "x.other.org"]);
        assert_eq!(zones.names().collect::<Vec<_>>(), vec!["example.com", "other.org"]);
        assert_eq!(
            zones.hosts("example.com").unwrap(),
            &["a.example.com".to_string(), "b.example.com".to_string()]
        );
        assert_eq!(zones.hosts("other.org").unwrap(), &["x.other.org".to_string()]);
    }

    #[test]
    fn bucket_order_is_first_occurrence() {
        let zones = group_by_root_zone(["x.other.org", "a.example.com", "y.other.org", "example.com"]);
        assert_eq!(zones.names().collect::<Vec<_>>(), vec!["other.org", "example.com"]);
        assert_eq!(
            zones.hosts("other.org").unwrap(),
            &["x.other.org".to_string(), "y.other.org".to_string()]
        );
        assert_eq!(
            zones.hosts("example.com").unwrap(),
            &["a.example.com".to_string(), "example.com".to_string()]
        );
    }

    #[test]
    fn repeated_hostnames_are_grouped_once() {
        let zones = group_by_root_zone(["a.example.com", "b.example.com", "a.example.com", "x.other.org"]);
        assert_eq!(
            zones.hostnames().collect::<Vec<_>>(),
            vec!["a.example.com", "b.example.com", "x.other.org"]
        );
    }

    #[test]
    fn root_zone_of_hostnames() {
        assert_eq!(root_zone("example.com"), Some("example.com"));
        assert_eq!(root_zone("deep.sub.example.com"), Some("example.com"));
        assert_eq!(root_zone("foo-bar.example.com"), Some("example.com"));
        assert_eq!(root_zone("my-site.com"), Some("site.com"));
        assert_eq!(root_zone("shop.example.co.uk"), Some("co.uk"));
        assert_eq!(root_zone("Web1.Example2.NET"), Some("Example2.NET"));
    }

    #[test]
    fn non_matching_hostnames_are_dropped() {
        assert_eq!(root_zone("localhost"), None);
        assert_eq!(root_zone("example.com."), None);
        assert_eq!(root_zone("foo.-.com"), None);
        assert_eq!(root_zone("foo.co-op"), None);

        let zones = group_by_root_zone(["localhost", "", "a.example.com"]);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones.hostnames().collect::<Vec<_>>(), vec!["a.example.com"]);
    }

    #[test]
    fn each_hostname_lands_in_exactly_one_bucket() {
        let hosts = ["a.one.io", "b.two.io", "c.one.io", "d.three.dev", "e.two.io"];
        let zones = group_by_root_zone(hosts);
        let mut grouped: Vec<_> = zones.hostnames().collect();
        grouped.sort();
        assert_eq!(grouped, hosts.to_vec());
        for (zone, hosts) in zones.iter() {
            assert!(hosts.iter().all(|host| root_zone(host) == Some(zone)));
        }
    }
}
