//! `reservectl` — the controller binary. Wires the CLI config, the proxy
//! admin client, and the controller event loop together, and maps a SIGINT
//! / SIGTERM into the loop's "go" flag.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reservectl::admin::AdminClient;
use reservectl::config::Args;
use reservectl::controller::{ArrivalRateSource, Controller};
use reservectl::fleet::Fleet;
use reservectl::metrics::{ArrivalRateRecorder, CostRecorder};

const BACKEND_NAME: &str = "www";
const SERVER_ROW_TYPE: i64 = 2;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Discovers the fleet by polling `show stat` once and collecting every
/// server row (`type = 2`) under the configured backend, in `sid` order.
/// Classifies the first `m` (in that order) as `reserve`, the rest
/// `always_on` — matching `Fleet::init`'s insertion-ordered split.
async fn discover_fleet(client: &mut AdminClient, m: u32) -> anyhow::Result<Fleet> {
    let stats = client.show_stat().await.context("initial show stat failed")?;

    let mut servers: Vec<(i64, String)> = stats
        .table
        .values()
        .flat_map(|services| services.values())
        .filter(|rec| rec.service_type == SERVER_ROW_TYPE && rec.pxname == BACKEND_NAME)
        .map(|rec| (rec.sid, rec.svname.clone()))
        .collect();
    servers.sort_by_key(|(sid, _)| *sid);

    if servers.is_empty() {
        anyhow::bail!("no server rows found under backend '{}'", BACKEND_NAME);
    }

    let ids = servers.into_iter().map(|(_, svname)| (svname.clone(), svname));
    Ok(Fleet::init(ids, m))
}

async fn load_oracle(path: &std::path::Path) -> anyhow::Result<Vec<f64>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read oracle trace {}", path.display()))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim().parse::<f64>().context("malformed oracle trace line"))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut client = AdminClient::connect(args.socket_path.to_string_lossy().into_owned())
        .await
        .context("failed to connect to proxy admin socket")?;

    match client.show_info().await {
        Ok(info) => tracing::info!(
            software = %info.software_name,
            version = %info.software_version,
            pid = info.pid,
            uptime = %info.uptime,
            "connected to proxy"
        ),
        Err(e) => tracing::warn!(error = %e, "show info failed, continuing without daemon metadata"),
    }

    let fleet = discover_fleet(&mut client, args.m).await?;
    let n = fleet.members().len() as u32;
    args.validate(n).context("invalid reserve configuration")?;

    let arrival_source = match &args.oracle {
        Some(path) => {
            tracing::info!(path = %path.display(), "using oracle load trace");
            ArrivalRateSource::Oracle(load_oracle(path).await?)
        }
        None => ArrivalRateSource::Measured,
    };

    let arr_rate = ArrivalRateRecorder::new(Some(std::path::Path::new("arr_rate.csv")))
        .context("failed to open arr_rate.csv")?;
    let cost_recorder = CostRecorder::new(args.c1, args.c2, Some(std::path::Path::new("cost.csv")))
        .context("failed to open cost.csv")?;

    let mut controller = Controller::new(
        client,
        fleet,
        args.reserves(),
        args.mu,
        args.nu(),
        args.costs(),
        args.cores,
        args.monitor_interval(),
        args.reconf_interval(),
        args.thresholds_enabled,
        arr_rate,
        cost_recorder,
        arrival_source,
    );

    let (tx, rx) = tokio::sync::watch::channel(true);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received exit signal");
        let _ = tx.send(false);
    });

    controller.run(&rx).await.context("controller loop failed")?;
    Ok(())
}
