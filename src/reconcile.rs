use crate::{
    cache::{
        HostCache,
        HostInformation,
        IngressOwner,
    },
    context::Context,
    daemon::TunnelDaemon,
    dns::cloudflare::CloudflareApi,
    tunnel::tunnel_hostname,
    zones::group_by_root_zone,
};
use futures::future::{
    join_all,
    try_join_all,
};
use k8s_openapi::api::networking::v1::Ingress;
use tracing::instrument;

/// Opts an Ingress into tunnel discovery. The value names the cloudflare tunnel to route its hosts through.
pub const TUNNEL_NAME_ANNOTATION: &str = "cloudflare.com/tunnel-name";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid tunnel config: {0}")]
    TunnelConfig(#[from] serde_yaml::Error),

    #[error("configmap {config_map} has no {key:?} entry")]
    MissingConfig { config_map: String, key: &'static str },

    #[error("ingress without {0}")]
    MissingMetadata(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct IngressEvent {
    pub phase: Phase,
    pub ingress: Ingress,
}

/// How far the handling of an event got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The Ingress has no tunnel annotation or no rules. Only the cache was updated.
    DiscoverySkipped,
    /// The annotated tunnel could not be resolved, DNS and tunnel config were left alone.
    TunnelNotFound,
    /// DNS was reconciled, the tunnel config rewritten and cloudflared restarted.
    Reconciled {
        /// Hostnames whose zone was found in cloudflare.
        hosts: usize,
        /// Records created, updated or deleted.
        dns_changes: usize,
        /// Hostnames whose records could not be reconciled.
        dns_failures: usize,
    },
}

pub fn tunnel_name(ingress: &Ingress) -> Option<&str> {
    ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(TUNNEL_NAME_ANNOTATION))
        .map(String::as_str)
}

/// Handles a single Ingress event: updates the host cache and, for Ingresses routed through a tunnel, points their
/// DNS records at the tunnel, rewrites the tunnel's ingress list from the cache and restarts cloudflared.
///
/// Failures of individual zones or hostnames are logged and counted, they don't stop the event. Failing to read or
/// write the tunnel config or to restart the daemon is returned as error.
#[instrument(level = "debug", skip_all, fields(phase = ?event.phase))]
pub async fn handle<D: TunnelDaemon>(
    event: &IngressEvent,
    cache: &mut HostCache,
    ctx: &Context<D>,
) -> Result<Outcome, ReconcileError> {
    let IngressEvent { phase, ingress } = event;
    let phase = *phase;
    let ns = ingress.metadata.namespace.as_deref().unwrap_or("default");
    let name = ingress
        .metadata
        .name
        .as_deref()
        .ok_or(ReconcileError::MissingMetadata("name"))?;
    info!("{ns}/{name} - Kubernetes: {phase:?}");

    let tunnel_name = tunnel_name(ingress);
    if let Some(tunnel_name) = tunnel_name {
        info!("{ns}/{name} set to use tunnel {tunnel_name}");
    }

    let rules = ingress.spec.as_ref().and_then(|spec| spec.rules.as_ref());
    let zones = group_by_root_zone(rules.into_iter().flatten().filter_map(|rule| rule.host.as_deref()));

    let owner = IngressOwner { namespace: ns, name };
    let desired = match phase {
        Phase::Deleted => Vec::new(),
        Phase::Added | Phase::Modified => zones
            .hostnames()
            .map(|hostname| HostInformation {
                namespace: ns.to_string(),
                hostname: hostname.to_string(),
                ingress_name: name.to_string(),
                discoverable_by_cf: tunnel_name.is_some(),
            })
            .collect(),
    };
    cache.replace_for_owner(owner, desired);
    debug!(cached = cache.len(), "cache updated");

    let Some(tunnel_name) = tunnel_name else {
        debug!("{ns}/{name} is not routed through a tunnel");
        return Ok(Outcome::DiscoverySkipped);
    };
    if rules.is_none() {
        debug!("{ns}/{name} has no rules");
        return Ok(Outcome::DiscoverySkipped);
    }

    let api = &ctx.cloudflare_api;

    let lookups = join_all(
        zones
            .iter()
            .map(|(zone, hosts)| async move { (zone, hosts, api.find_zone(zone).await) }),
    )
    .await;

    let mut hosts_by_zone_id = Vec::new();
    for (zone_name, hosts, lookup) in lookups {
        match lookup {
            Ok(Some(zone)) => hosts_by_zone_id.push((zone.id, hosts)),
            Ok(None) => warn!(zone = zone_name, "zone not found in cloudflare, skipping its hosts"),
            Err(err) => error!(zone = zone_name, "failed to look up zone: {err:?}"),
        }
    }
    debug!("Determined lists of hosts that match valid zones {hosts_by_zone_id:?}");

    let tunnel = match api.find_tunnel(tunnel_name).await {
        Ok(Some(tunnel)) => tunnel,
        Ok(None) => {
            warn!(tunnel = tunnel_name, "tunnel not found, leaving dns and tunnel config alone");
            return Ok(Outcome::TunnelNotFound);
        }
        Err(err) => {
            error!(tunnel = tunnel_name, "failed to look up tunnel: {err:?}");
            return Ok(Outcome::TunnelNotFound);
        }
    };
    let target = tunnel_hostname(&tunnel.id);
    info!("Found tunnel hostname {target}");

    let target = target.as_str();
    let results = join_all(hosts_by_zone_id.iter().flat_map(|(zone_id, hosts)| {
        hosts.iter().map(move |hostname| async move {
            let result = reconcile_host(api, phase, zone_id, hostname, target).await;
            (hostname, result)
        })
    }))
    .await;

    let hosts = results.len();
    let mut dns_changes = 0;
    let mut dns_failures = 0;
    for (hostname, result) in results {
        match result {
            Ok(changes) => dns_changes += changes,
            Err(err) => {
                error!(?hostname, "failed to reconcile dns records: {err:?}");
                dns_failures += 1;
            }
        }
    }
    debug!(hosts, dns_changes, dns_failures, "dns reconciled");

    rewrite_tunnel_config(cache, ctx).await?;

    Ok(Outcome::Reconciled {
        hosts,
        dns_changes,
        dns_failures,
    })
}

/// Drops the cached hosts of Ingresses that vanished without a delete event, e.g. while the watch was disconnected.
/// If any of them was routed through the tunnel, the tunnel config is rewritten and cloudflared restarted.
///
/// Returns whether the tunnel config was rewritten. DNS records of the vanished Ingresses are left in place.
pub async fn purge_owners<D: TunnelDaemon>(
    owners: &[(String, String)],
    cache: &mut HostCache,
    ctx: &Context<D>,
) -> Result<bool, ReconcileError> {
    let mut routed = false;
    for (namespace, name) in owners {
        let owner = IngressOwner {
            namespace: namespace.as_str(),
            name: name.as_str(),
        };
        routed |= cache.entries_for_owner(owner).any(|entry| entry.discoverable_by_cf);
        info!("{owner} is gone, dropping its hosts");
        cache.replace_for_owner(owner, Vec::new());
    }

    if !routed {
        return Ok(false);
    }
    rewrite_tunnel_config(cache, ctx).await?;
    Ok(true)
}

/// Routes every discoverable cached host through the tunnel and restarts cloudflared to pick the change up.
async fn rewrite_tunnel_config<D: TunnelDaemon>(cache: &HostCache, ctx: &Context<D>) -> Result<(), ReconcileError> {
    let mut config = ctx.daemon.load_config().await?;
    config.set_ingress(
        &ctx.ingress_service,
        cache.discoverable_entries().map(|entry| entry.hostname.as_str()),
    );
    ctx.daemon.store_config(&config).await?;
    debug!(rules = config.ingress.len(), "tunnel config rewritten");

    ctx.daemon.restart().await
}

/// Makes the CNAME records of `hostname` point at `target`, or deletes them. Returns the number of changed records.
async fn reconcile_host(
    api: &CloudflareApi,
    phase: Phase,
    zone_id: &str,
    hostname: &str,
    target: &str,
) -> eyre::Result<usize> {
    let Some(records) = api.find_dns_records(zone_id, hostname).await? else {
        return Ok(0);
    };
    let cnames: Vec<_> = records.iter().filter(|record| record.is_cname()).collect();

    match phase {
        Phase::Deleted => {
            try_join_all(cnames.iter().map(|record| api.delete_dns_record(zone_id, &record.id))).await?;
            if !cnames.is_empty() {
                info!("Deleted records for [{hostname}]");
            }
        }
        Phase::Added | Phase::Modified if cnames.is_empty() => {
            api.create_cname(zone_id, hostname, target).await?;
            info!("Created record for [{hostname}] to point at [{target}]");
            return Ok(1);
        }
        Phase::Added | Phase::Modified => {
            try_join_all(
                cnames
                    .iter()
                    .map(|record| api.update_record_content(zone_id, &record.id, target)),
            )
            .await?;
            info!("Updated record for [{hostname}] to point at [{target}]");
        }
    }

    Ok(cnames.len())
}
