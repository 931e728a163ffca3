use crate::{
    cache::HostCache,
    context::Context,
    daemon::TunnelDaemon,
    reconcile::{
        self,
        IngressEvent,
        Phase,
    },
};
use futures::StreamExt as _;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    runtime::{
        watcher,
        WatchStreamExt as _,
    },
    Api,
};
use std::collections::BTreeSet;

/// Turns a watcher event into something the reconciler handles. Objects replayed while (re)listing count as added.
pub fn ingress_event(event: watcher::Event<Ingress>) -> Option<IngressEvent> {
    let (phase, ingress) = match event {
        watcher::Event::InitApply(ingress) => (Phase::Added, ingress),
        watcher::Event::Apply(ingress) => (Phase::Modified, ingress),
        watcher::Event::Delete(ingress) => (Phase::Deleted, ingress),
        watcher::Event::Init | watcher::Event::InitDone => return None,
    };
    Some(IngressEvent { phase, ingress })
}

/// Tracks which Ingresses a (re)list of the watch replays. Ingresses deleted while the watch was down are not replayed
/// and never get a delete event, so their owners are reported once the list completes.
#[derive(Debug, Default)]
pub struct Relist {
    seen: Option<BTreeSet<(String, String)>>,
}

impl Relist {
    /// Returns the cached owners the list did not replay, when `event` completes a list.
    pub fn observe(&mut self, event: &watcher::Event<Ingress>, cache: &HostCache) -> Option<Vec<(String, String)>> {
        match event {
            watcher::Event::Init => {
                self.seen = Some(BTreeSet::new());
            }
            watcher::Event::InitApply(ingress) => {
                if let (Some(seen), Some(owner)) = (self.seen.as_mut(), owner_key(ingress)) {
                    seen.insert(owner);
                }
            }
            watcher::Event::InitDone => {
                let seen = self.seen.take()?;
                let gone = cache
                    .owners()
                    .into_iter()
                    .map(|owner| (owner.namespace.to_string(), owner.name.to_string()))
                    .filter(|owner| !seen.contains(owner))
                    .collect();
                return Some(gone);
            }
            watcher::Event::Apply(_) | watcher::Event::Delete(_) => {}
        }
        None
    }
}

/// `(namespace, name)` as the host cache records it.
fn owner_key(ingress: &Ingress) -> Option<(String, String)> {
    let name = ingress.metadata.name.clone()?;
    let namespace = ingress.metadata.namespace.as_deref().unwrap_or("default");
    Some((namespace.to_string(), name))
}

/// Watches all Ingresses of the cluster and reconciles them one event at a time until a shutdown signal arrives.
///
/// The host cache lives here and starts out empty, the initial listing of the watch fills it. Watch errors are logged
/// and the watcher resubscribes with backoff. After every relist, hosts of Ingresses that were not replayed are dropped.
pub async fn run<D: TunnelDaemon>(client: kube::Client, ctx: Context<D>) {
    let api = Api::<Ingress>::all(client);
    let mut cache = HostCache::new();
    let mut relist = Relist::default();
    let mut events = watcher(api, watcher::Config::default()).default_backoff().boxed();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Watching ingresses");

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown command");
                break;
            }
            event = events.next() => event,
        };

        match event {
            None => break,
            Some(Err(err)) => {
                error!("Watcher Error: {err}");
            }
            Some(Ok(event)) => {
                if let Some(gone) = relist.observe(&event, &cache).filter(|gone| !gone.is_empty()) {
                    match reconcile::purge_owners(&gone, &mut cache, &ctx).await {
                        Ok(rewritten) => debug!(owners = ?gone, rewritten, "dropped ingresses missing after relist"),
                        Err(err) => error!("Error dropping ingresses missing after relist: {err}"),
                    }
                }
                let Some(event) = ingress_event(event) else {
                    continue;
                };
                match reconcile::handle(&event, &mut cache, &ctx).await {
                    Ok(outcome) => debug!(?outcome, "event handled"),
                    Err(err) => error!("Error reconciling: {err}"),
                }
            }
        }
    }

    info!("Watcher completed");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{
            signal,
            SignalKind,
        };
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = tokio::signal::ctrl_c() => {},
                }
                return;
            }
            Err(err) => warn!("unable to listen for SIGTERM: {err}"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("unable to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HostInformation;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn named(name: &str) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn maps_watch_events_to_phases() {
        let phase = |event| ingress_event(event).map(|it| it.phase);

        assert_eq!(phase(watcher::Event::InitApply(named("a"))), Some(Phase::Added));
        assert_eq!(phase(watcher::Event::Apply(named("a"))), Some(Phase::Modified));
        assert_eq!(phase(watcher::Event::Delete(named("a"))), Some(Phase::Deleted));
        assert_eq!(phase(watcher::Event::Init), None);
        assert_eq!(phase(watcher::Event::InitDone), None);
    }

    #[test]
    fn keeps_the_object() {
        let event = ingress_event(watcher::Event::Apply(named("web"))).unwrap();
        assert_eq!(event.ingress.metadata.name.as_deref(), Some("web"));
    }

    fn cached(cache: &mut HostCache, hostname: &str, ingress_name: &str) {
        cache.put(HostInformation {
            namespace: "default".to_string(),
            hostname: hostname.to_string(),
            ingress_name: ingress_name.to_string(),
            discoverable_by_cf: true,
        });
    }

    #[test]
    fn relist_reports_owners_that_were_not_replayed() {
        let mut cache = HostCache::new();
        cached(&mut cache, "a.example.com", "kept");
        cached(&mut cache, "b.example.com", "gone");
        let mut relist = Relist::default();

        assert_eq!(relist.observe(&watcher::Event::Init, &cache), None);
        assert_eq!(relist.observe(&watcher::Event::InitApply(named("kept")), &cache), None);
        assert_eq!(
            relist.observe(&watcher::Event::InitDone, &cache),
            Some(vec![("default".to_string(), "gone".to_string())])
        );

        // the list is done, a stray InitDone reports nothing
        assert_eq!(relist.observe(&watcher::Event::InitDone, &cache), None);
    }

    #[test]
    fn complete_relist_reports_nothing() {
        let mut cache = HostCache::new();
        cached(&mut cache, "a.example.com", "web");
        let mut relist = Relist::default();

        relist.observe(&watcher::Event::Init, &cache);
        relist.observe(&watcher::Event::InitApply(named("web")), &cache);
        relist.observe(&watcher::Event::InitApply(named("not-cached")), &cache);
        assert_eq!(relist.observe(&watcher::Event::InitDone, &cache), Some(vec![]));
    }

    #[test]
    fn events_outside_a_list_are_ignored() {
        let mut cache = HostCache::new();
        cached(&mut cache, "a.example.com", "web");
        let mut relist = Relist::default();

        assert_eq!(relist.observe(&watcher::Event::Apply(named("other")), &cache), None);
        assert_eq!(relist.observe(&watcher::Event::Delete(named("web")), &cache), None);
        assert_eq!(relist.observe(&watcher::Event::InitApply(named("other")), &cache), None);
        assert_eq!(relist.observe(&watcher::Event::InitDone, &cache), None);
    }
}
