use eyre::{
    bail,
    Context as _,
    Result,
};
use reqwest::Method;
use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::time::Duration;

pub const CLOUDFLARE_API_URL: &str = "https://api.cloudflare.com/client/v4";

/// TTL of the CNAME records we create, in seconds.
pub const RECORD_TTL: i64 = 300;

/// Wraps the cloudflare api response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResult<T> {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiError>,
    #[serde(default)]
    pub messages: Value,
    pub result: Option<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

impl<T> ApiResult<T> {
    /// The result of a successful call. `None` if cloudflare reported failure.
    fn into_result(self) -> Option<T> {
        if self.success {
            self.result
        } else {
            warn!(errors = ?self.errors, "cloudflare api reported failure");
            None
        }
    }
}

/// A zone or tunnel. Both are looked up by name and only their id is of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
}

/// A cloudflare dns record.
///
/// See https://developers.cloudflare.com/api/operations/dns-records-for-a-zone-list-dns-records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecordInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub proxied: Option<bool>,
}

impl DnsRecordInfo {
    pub fn is_cname(&self) -> bool {
        self.record_type == "CNAME"
    }
}

/// Request payload for creating a new dns record.
///
/// See https://developers.cloudflare.com/api/operations/dns-records-for-a-zone-create-dns-record.
#[derive(Debug, Serialize)]
struct CreateDnsRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: i64,
    proxied: bool,
}

#[derive(Debug, Serialize)]
struct PatchDnsRecord<'a> {
    content: &'a str,
}

/// Client for the parts of the cloudflare v4 api that deal with zones, tunnels and dns records.
#[derive(Debug, Clone)]
pub struct CloudflareApi {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    account_id: String,
}

impl CloudflareApi {
    pub fn new(api_token: impl ToString, account_id: impl ToString, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build().context("unable to build http client")?,
            base_url: CLOUDFLARE_API_URL.to_string(),
            api_token: api_token.to_string(),
            account_id: account_id.to_string(),
        })
    }

    /// Sends requests to `base_url` instead of the public cloudflare api.
    pub fn with_base_url(mut self, base_url: impl ToString) -> Self {
        self.base_url = base_url.to_string().trim_end_matches('/').to_string();
        self
    }

    /// List all zones the token has access to.
    pub async fn list_zones(&self) -> Result<Vec<Resource>> {
        let zones = self.request::<Vec<Resource>, ()>(Method::GET, "/zones", &[], None).await?;
        Ok(zones.into_result().unwrap_or_default())
    }

    /// Looks up a zone by its name (e.g. "example.com").
    pub async fn find_zone(&self, name: &str) -> Result<Option<Resource>> {
        debug!(?name, "looking up zone by name");
        let zones = self
            .request::<Vec<Resource>, ()>(Method::GET, "/zones", &[("name", name)], None)
            .await?;
        Ok(zones
            .into_result()
            .and_then(|zones| zones.into_iter().find(|zone| zone.name == name)))
    }

    /// Looks up a tunnel of the configured account by its name.
    pub async fn find_tunnel(&self, name: &str) -> Result<Option<Resource>> {
        debug!(?name, "looking up tunnel by name");
        let path = format!("/accounts/{}/cfd_tunnel", self.account_id);
        let tunnels = self
            .request::<Vec<Resource>, ()>(Method::GET, &path, &[("name", name)], None)
            .await?;
        Ok(tunnels.into_result().and_then(|tunnels| tunnels.into_iter().next()))
    }

    /// Lists the records named `name` in a zone. `None` if cloudflare refused to list them.
    pub async fn find_dns_records(&self, zone_id: &str, name: &str) -> Result<Option<Vec<DnsRecordInfo>>> {
        let path = format!("/zones/{zone_id}/dns_records");
        let records = self
            .request::<Vec<DnsRecordInfo>, ()>(Method::GET, &path, &[("name", name)], None)
            .await?;
        Ok(records.into_result())
    }

    /// Creates a proxied CNAME record `name` -> `target`.
    pub async fn create_cname(&self, zone_id: &str, name: &str, target: &str) -> Result<()> {
        info!(?zone_id, ?name, ?target, "creating CNAME record");
        let path = format!("/zones/{zone_id}/dns_records");
        let body = CreateDnsRecord {
            record_type: "CNAME",
            name,
            content: target,
            ttl: RECORD_TTL,
            proxied: true,
        };
        self.request::<Value, _>(Method::POST, &path, &[], Some(body)).await?;
        Ok(())
    }

    /// Points an existing record at `content`.
    pub async fn update_record_content(&self, zone_id: &str, record_id: &str, content: &str) -> Result<()> {
        info!(?zone_id, ?record_id, ?content, "updating dns record");
        let path = format!("/zones/{zone_id}/dns_records/{record_id}");
        self.request::<Value, _>(Method::PATCH, &path, &[], Some(PatchDnsRecord { content }))
            .await?;
        Ok(())
    }

    /// Delete a DNS record by its id.
    pub async fn delete_dns_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        info!(?zone_id, ?record_id, "deleting dns record");
        let path = format!("/zones/{zone_id}/dns_records/{record_id}");
        self.request::<Value, ()>(Method::DELETE, &path, &[], None).await?;
        Ok(())
    }

    async fn request<R, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<B>,
    ) -> Result<ApiResult<R>>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        trace!(%method, ?url, ?query, "cloudflare api request");

        let req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_token)
            .query(query);

        let req = if let Some(body) = body { req.json(&body) } else { req };

        let res = req.send().await.with_context(|| format!("request to {url} failed"))?;

        if !res.status().is_success() {
            bail!(
                "cloudflare api error: status={:?}, body={:?}",
                res.status(),
                res.text().await?
            );
        }

        let body: Value = res.json().await?;
        match serde_json::from_value(body.clone()) {
            Err(err) => bail!(
                "failed to parse api response: {err:?}: {}",
                serde_json::to_string_pretty(&body)?
            ),
            Ok(it) => Ok(it),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{
            body_json,
            header,
            method,
            path,
            query_param,
        },
        Mock,
        MockServer,
        ResponseTemplate,
    };

    fn envelope(result: Value) -> Value {
        json!({ "success": true, "errors": [], "messages": [], "result": result })
    }

    async fn api(server: &MockServer) -> CloudflareApi {
        CloudflareApi::new("token", "account", Some(Duration::from_secs(5)))
            .unwrap()
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn find_zone_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "example.com"))
            .and(header("authorization", "Bearer token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(envelope(json!([{ "id": "zone-1", "name": "example.com" }]))),
            )
            .mount(&server)
            .await;

        let zone = api(&server).await.find_zone("example.com").await.unwrap();
        assert_eq!(
            zone,
            Some(Resource {
                id: "zone-1".to_string(),
                name: "example.com".to_string()
            })
        );
    }

    #[tokio::test]
    async fn unknown_zone_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
            .mount(&server)
            .await;

        assert_eq!(api(&server).await.find_zone("example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": [{ "code": 1003, "message": "Invalid or missing zone id." }],
                "messages": [],
                "result": null
            })))
            .mount(&server)
            .await;

        let records = api(&server)
            .await
            .find_dns_records("zone-1", "a.example.com")
            .await
            .unwrap();
        assert_eq!(records, None);
    }

    #[tokio::test]
    async fn http_errors_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/account/cfd_tunnel"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = api(&server).await.find_tunnel("my-tunnel").await.unwrap_err();
        assert!(format!("{err}").contains("403"));
    }

    #[tokio::test]
    async fn find_tunnel_takes_first_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/account/cfd_tunnel"))
            .and(query_param("name", "my-tunnel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                { "id": "tunnel-1", "name": "my-tunnel", "status": "healthy" }
            ]))))
            .mount(&server)
            .await;

        let tunnel = api(&server).await.find_tunnel("my-tunnel").await.unwrap().unwrap();
        assert_eq!(tunnel.id, "tunnel-1");
    }

    #[tokio::test]
    async fn record_mutations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .and(body_json(json!({
                "type": "CNAME",
                "name": "a.example.com",
                "content": "tunnel-1.cfargotunnel.com",
                "ttl": 300,
                "proxied": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "id": "rec-1" }))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .and(body_json(json!({ "content": "tunnel-2.cfargotunnel.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "id": "rec-1" }))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "id": "rec-1" }))))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server).await;
        api.create_cname("zone-1", "a.example.com", "tunnel-1.cfargotunnel.com")
            .await
            .unwrap();
        api.update_record_content("zone-1", "rec-1", "tunnel-2.cfargotunnel.com")
            .await
            .unwrap();
        api.delete_dns_record("zone-1", "rec-1").await.unwrap();
    }
}
