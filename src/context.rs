use crate::dns::cloudflare::CloudflareApi;

/// Everything the reconciler needs besides the host cache, which the watch loop owns.
pub struct Context<D> {
    pub cloudflare_api: CloudflareApi,
    pub daemon: D,
    /// Where the tunnel sends traffic for discovered hosts, e.g. `https://ingress-nginx-controller.ingress-nginx`.
    pub ingress_service: String,
}
