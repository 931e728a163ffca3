use crate::{
    reconcile::ReconcileError,
    tunnel::TunnelConfig,
};
use async_trait::async_trait;
use chrono::{
    SecondsFormat,
    Utc,
};
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::ConfigMap,
};
use kube::{
    api::{
        Patch,
        PatchParams,
    },
    Api,
};
use serde_json::{
    json,
    Value,
};

/// Key of the daemon's ConfigMap that holds the cloudflared config file.
pub const CONFIG_KEY: &str = "config.yaml";

/// Annotation `kubectl rollout restart` uses to roll the pods of a workload.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// The cloudflared deployment: where its configuration is persisted and how to make it pick up a new one.
#[async_trait]
pub trait TunnelDaemon: Send + Sync {
    async fn load_config(&self) -> Result<TunnelConfig, ReconcileError>;

    async fn store_config(&self, config: &TunnelConfig) -> Result<(), ReconcileError>;

    async fn restart(&self) -> Result<(), ReconcileError>;
}

/// Merge patch replacing the config file of the daemon's ConfigMap.
fn config_patch(yaml: String) -> Value {
    json!({ "data": { CONFIG_KEY: yaml } })
}

/// Strategic merge patch that rolls the pods of a workload, like `kubectl rollout restart` does.
fn restart_patch(restarted_at: &str) -> Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": { RESTARTED_AT_ANNOTATION: restarted_at }
                }
            }
        }
    })
}

/// cloudflared running as a DaemonSet that mounts its config from a ConfigMap.
pub struct KubeTunnelDaemon {
    pub client: kube::Client,
    pub namespace: String,
    pub config_map: String,
    pub daemon_set: String,
}

#[async_trait]
impl TunnelDaemon for KubeTunnelDaemon {
    async fn load_config(&self) -> Result<TunnelConfig, ReconcileError> {
        let config_map = Api::<ConfigMap>::namespaced(self.client.clone(), &self.namespace)
            .get(&self.config_map)
            .await?;

        let Some(yaml) = config_map.data.as_ref().and_then(|data| data.get(CONFIG_KEY)) else {
            return Err(ReconcileError::MissingConfig {
                config_map: format!("{}/{}", self.namespace, self.config_map),
                key: CONFIG_KEY,
            });
        };

        Ok(TunnelConfig::from_yaml(yaml)?)
    }

    async fn store_config(&self, config: &TunnelConfig) -> Result<(), ReconcileError> {
        let yaml = config.to_yaml()?;
        info!(config_map = %self.config_map, ns = %self.namespace, "writing tunnel config");

        Api::<ConfigMap>::namespaced(self.client.clone(), &self.namespace)
            .patch(&self.config_map, &PatchParams::default(), &Patch::Merge(&config_patch(yaml)))
            .await?;

        Ok(())
    }

    async fn restart(&self) -> Result<(), ReconcileError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        info!(daemon_set = %self.daemon_set, ns = %self.namespace, restarted_at = %now, "restarting cloudflared");

        Api::<DaemonSet>::namespaced(self.client.clone(), &self.namespace)
            .patch(&self.daemon_set, &PatchParams::default(), &Patch::Strategic(&restart_patch(&now)))
            .await?;

        Ok(())
    }
}
