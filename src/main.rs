#[macro_use]
extern crate tracing;

use clap::Parser;
use cloudflare_tunnel_ingress::{
    context::Context,
    daemon::KubeTunnelDaemon,
    dns::cloudflare::CloudflareApi,
    tunnel::tunnel_hostname,
    watch,
};
use eyre::{
    OptionExt as _,
    Result,
};
use std::time::Duration;

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Watch ingresses and expose their hosts through the cloudflare tunnel.
    Controller(ArgsController),
    /// List the zones the api token has access to.
    ListZones(ArgsCloudflare),
    /// Print the hostname dns records have to point at to reach a tunnel.
    TunnelHostname(ArgsTunnel),
}

#[derive(Parser)]
struct ArgsCloudflare {
    #[clap(long, env = "CLOUDFLARE_TOKEN", help = "Cloudflare API token")]
    cloudflare_token: String,

    #[clap(long, env = "CLOUDFLARE_ACCOUNT_ID", help = "Cloudflare account owning the tunnel")]
    cloudflare_account_id: String,

    #[clap(
        long,
        env = "CLOUDFLARE_REQUEST_TIMEOUT",
        help = "Timeout for requests to the cloudflare api",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    request_timeout: Duration,
}

#[derive(Parser)]
struct ArgsController {
    #[clap(flatten)]
    cloudflare: ArgsCloudflare,

    #[clap(long, env = "NAMESPACE", help = "Namespace cloudflared runs in")]
    namespace: String,

    #[clap(
        long,
        env = "CLOUDFLARED_CONFIG_CM",
        help = "ConfigMap holding the cloudflared config.yaml"
    )]
    cloudflared_config_cm: String,

    #[clap(long, env = "CLOUDFLARED_DAEMON_SET", help = "DaemonSet running cloudflared")]
    cloudflared_daemon_set: String,

    #[clap(
        long,
        env = "INGRESS_SERVICE",
        help = "Service the tunnel forwards traffic for discovered hosts to"
    )]
    ingress_service: String,
}

#[derive(Parser)]
struct ArgsTunnel {
    #[clap(flatten)]
    cloudflare: ArgsCloudflare,

    /// Name of the tunnel
    name: String,
}

impl ArgsCloudflare {
    fn api(&self) -> Result<CloudflareApi> {
        CloudflareApi::new(
            &self.cloudflare_token,
            &self.cloudflare_account_id,
            Some(self.request_timeout),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().expect("color_eyre init");
    tracing_subscriber::fmt::init();

    match Args::parse() {
        Args::Controller(args) => {
            run_controller(args).await?;
        }
        Args::ListZones(args) => {
            for zone in args.api()?.list_zones().await? {
                println!("{} {}", zone.id, zone.name);
            }
        }
        Args::TunnelHostname(args) => {
            let tunnel = args
                .cloudflare
                .api()?
                .find_tunnel(&args.name)
                .await?
                .ok_or_eyre("tunnel not found")?;
            println!("{}", tunnel_hostname(&tunnel.id));
        }
    }

    Ok(())
}

async fn run_controller(args: ArgsController) -> Result<()> {
    let cloudflare_api = args.cloudflare.api()?;
    let ArgsController {
        namespace,
        cloudflared_config_cm,
        cloudflared_daemon_set,
        ingress_service,
        ..
    } = args;

    let client = kube::Client::try_default().await?;

    let context = Context {
        cloudflare_api,
        daemon: KubeTunnelDaemon {
            client: client.clone(),
            namespace,
            config_map: cloudflared_config_cm,
            daemon_set: cloudflared_daemon_set,
        },
        ingress_service,
    };

    info!("Starting controller");

    watch::run(client, context).await;

    info!("Controller stopped");

    Ok(())
}
