//! The cloudflared configuration document, as stored under the `config.yaml` key of the daemon's ConfigMap.
//!
//! See https://developers.cloudflare.com/cloudflare-one/connections/connect-apps/configure-tunnels/local-management/configuration-file/

use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// Suffix of the hostname Cloudflare assigns to every tunnel.
pub const TUNNEL_BASE_NAME: &str = "cfargotunnel.com";

/// Service of the rule that has to close every ingress list.
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// The hostname DNS records point at to route traffic into the tunnel with id `tunnel_id`.
pub fn tunnel_hostname(tunnel_id: &str) -> String {
    format!("{tunnel_id}.{TUNNEL_BASE_NAME}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub tunnel: String,
    #[serde(rename = "credentials-file")]
    pub credentials_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<String>,
    #[serde(rename = "no-autoupdate", default, skip_serializing_if = "Option::is_none")]
    pub no_autoupdate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loglevel: Option<String>,
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
    /// Settings we don't manage are carried over untouched.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_request: Option<OriginRequest>,
}

/// Per-rule settings for the connection between cloudflared and the origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginRequest {
    /// Timeout for establishing a TCP connection to the origin, e.g. `10s`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_keep_alive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_happy_eyeballs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_timeout: Option<String>,
    /// Host header sent to the origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_host_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_pool: Option<String>,
    #[serde(rename = "noTLSVerify", skip_serializing_if = "Option::is_none")]
    pub no_tls_verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_chunked_encoding: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    /// Empty or `socks`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<String>,
}

impl IngressRule {
    /// Routes `hostname` to `service`, forwarding the original host header. The ingress controller behind `service`
    /// usually presents a certificate for the hostname which cloudflared can't verify, hence `noTLSVerify`.
    pub fn for_host(service: &str, hostname: &str) -> Self {
        Self {
            service: service.to_string(),
            hostname: Some(hostname.to_string()),
            path: None,
            origin_request: Some(OriginRequest {
                http_host_header: Some(hostname.to_string()),
                no_tls_verify: Some(true),
                ..Default::default()
            }),
        }
    }

    pub fn catch_all() -> Self {
        Self {
            service: CATCH_ALL_SERVICE.to_string(),
            ..Default::default()
        }
    }
}

impl TunnelConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Replaces the ingress list with one rule per hostname routed to `service`, followed by the catch-all rule.
    pub fn set_ingress<'a>(&mut self, service: &str, hostnames: impl IntoIterator<Item = &'a str>) {
        self.ingress = hostnames
            .into_iter()
            .map(|hostname| IngressRule::for_host(service, hostname))
            .chain(std::iter::once(IngressRule::catch_all()))
            .collect();
    }
}
