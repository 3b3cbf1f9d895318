//! C5 — controller loop. Polls the proxy on a fixed cadence, accounts for
//! cost and arrival rate, periodically reruns the policy search, and
//! drives the reserve power-up/power-down state machine (§4.5).

use std::time::{Duration, Instant};

use rand_distr::{Distribution, Exp};
use tracing::{debug, info, warn};

use crate::admin::{AdminClient, SocketError};
use crate::fleet::Fleet;
use crate::metrics::{ArrivalRateRecorder, CostRecorder};
use crate::model::{Costs, Load, ReserveState, Reserves};
use crate::search::Heuristic;
use crate::stats::{self, ParsedStats};

/// A source of λ for a reconfiguration epoch: either the live estimate or
/// a value replayed from a recorded trace ("oracle" mode).
pub enum ArrivalRateSource {
    Measured,
    Oracle(Vec<f64>),
}

impl ArrivalRateSource {
    fn lambda_for(&self, epoch: usize, measured: f64) -> f64 {
        match self {
            ArrivalRateSource::Measured => measured,
            ArrivalRateSource::Oracle(trace) => trace.get(epoch).copied().unwrap_or(measured),
        }
    }
}

/// Fixed parameters for the controller's lifetime; only `fleet`,
/// `reserves` and `state` mutate during `run`.
pub struct Controller {
    client: AdminClient,
    fleet: Fleet,
    reserves: Reserves,
    state: ReserveState,
    mu: f64,
    nu: f64,
    costs: Costs,
    core_multiplier: u32,
    monitor_interval: Duration,
    reconf_interval: Duration,
    thresholds_enabled: bool,
    arr_rate: ArrivalRateRecorder,
    cost_recorder: CostRecorder,
    arrival_source: ArrivalRateSource,
    epoch: usize,
    power_up_deadline: Option<Instant>,
    next_reconfig_at: Option<Instant>,
    recovery_escalations: u32,
    last_stats: Option<ParsedStats>,
}

/// Backend name used by every fleet member's proxy-facing command, e.g.
/// `enable server www/<id>`.
const BACKEND_NAME: &str = "www";

/// Fatal controller failure: escalated after Recovery fails twice.
#[derive(Debug)]
pub enum ControllerError {
    Socket(SocketError),
    RecoveryFailed { expected: u32, actual: i64 },
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Socket(e) => write!(f, "{}", e),
            ControllerError::RecoveryFailed { expected, actual } => write!(
                f,
                "recovery failed: expected {} active servers, have {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<SocketError> for ControllerError {
    fn from(e: SocketError) -> Self {
        ControllerError::Socket(e)
    }
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: AdminClient,
        fleet: Fleet,
        reserves: Reserves,
        mu: f64,
        nu: f64,
        costs: Costs,
        core_multiplier: u32,
        monitor_interval: Duration,
        reconf_interval: Duration,
        thresholds_enabled: bool,
        arr_rate: ArrivalRateRecorder,
        cost_recorder: CostRecorder,
        arrival_source: ArrivalRateSource,
    ) -> Self {
        Controller {
            client,
            fleet,
            reserves,
            state: ReserveState::Off,
            mu,
            nu,
            costs,
            core_multiplier,
            monitor_interval,
            reconf_interval,
            thresholds_enabled,
            arr_rate,
            cost_recorder,
            arrival_source,
            epoch: 0,
            power_up_deadline: None,
            next_reconfig_at: None,
            recovery_escalations: 0,
            last_stats: None,
        }
    }

    pub fn state(&self) -> ReserveState {
        self.state
    }

    pub fn reserves(&self) -> Reserves {
        self.reserves
    }

    /// Runs the event loop until `go` is flipped to false (checked once
    /// per tick, at the boundary described in §5).
    pub async fn run(&mut self, go: &tokio::sync::watch::Receiver<bool>) -> Result<(), ControllerError> {
        self.disable_all_reserves().await?;

        if self.reconf_interval > Duration::ZERO {
            self.next_reconfig_at = Some(Instant::now() + self.reconf_interval);
        }

        while *go.borrow() {
            let tick_start = Instant::now();
            self.tick(tick_start).await?;

            let elapsed = tick_start.elapsed();
            if elapsed < self.monitor_interval {
                tokio::time::sleep(self.monitor_interval - elapsed).await;
            }
        }

        self.client.close().await;
        let _ = self.cost_recorder.flush();
        Ok(())
    }

    /// One iteration: poll → parse → accounting → reconfig? → threshold?
    /// (§5's fixed tick ordering).
    async fn tick(&mut self, now: Instant) -> Result<(), ControllerError> {
        let stats = match self.client.show_stat().await {
            Ok(stats) => stats,
            Err(_) => {
                self.client.reconnect().await?;
                self.client.show_stat().await?
            }
        };

        if let Some(prior) = &self.last_stats {
            if let Some(drift) = stats::detect_drift(prior, &stats) {
                warn!(%drift, "proxy config drift detected");
                self.arr_rate.reset();
            }
        }
        self.last_stats = Some(stats.clone());

        let backend = stats
            .table
            .values()
            .find_map(|services| services.get("BACKEND"))
            .cloned();

        let Some(backend) = backend else {
            warn!("tick produced no BACKEND row; skipping");
            return Ok(());
        };

        let measured_lambda = self.arr_rate.update(backend.stot, now).unwrap_or(0.0);

        let powered_on = if self.state == ReserveState::PoweringOn {
            self.fleet.members().len() as u32
        } else {
            backend.act as u32
        };

        let _ = self.cost_recorder.update(
            backend.scur,
            powered_on,
            backend.act as u32,
            now,
            measured_lambda,
            self.reserves,
        );

        debug!(scur = backend.scur, act = backend.act, state = ?self.state, "tick");

        if let Some(deadline) = self.next_reconfig_at {
            if now >= deadline {
                self.reconfigure(measured_lambda).await?;
                self.next_reconfig_at = Some(now + self.reconf_interval);
            }
        }

        if self.thresholds_enabled {
            self.apply_thresholds(backend.scur).await?;
        }

        if let Some(deadline) = self.power_up_deadline {
            if now >= deadline {
                self.power_up_deadline = None;
                self.on_power_up_timer(backend.scur).await?;
            }
        }

        Ok(())
    }

    /// Threshold check (§4.5 step 4): arms the power-up timer or disables
    /// reserves outright.
    async fn apply_thresholds(&mut self, scur: i64) -> Result<(), ControllerError> {
        if self.reserves.m == 0 {
            return Ok(());
        }

        if self.state == ReserveState::Off && scur > self.reserves.u as i64 {
            let power_up_time = 1.0 / self.nu;
            let delay = Exp::new(self.nu)
                .map(|dist| dist.sample(&mut rand::thread_rng()))
                .unwrap_or(power_up_time);
            info!(scur, delay, "arming power-up timer");
            self.state = ReserveState::PoweringOn;
            self.power_up_deadline = Some(Instant::now() + Duration::from_secs_f64(delay.max(0.0)));
        } else if self.state == ReserveState::On && scur <= self.reserves.d as i64 {
            info!(scur, "disabling reserves, scur at or below D");
            self.disable_reserves().await?;
            self.state = ReserveState::Off;
        }
        Ok(())
    }

    /// Fires on power-up timer expiry (§4.5 "On power-up timer expiry").
    /// Preserves Open Question (ii)'s resolved sentinel: `scur <= D`
    /// collapses the transition back to OFF without enabling anything.
    async fn on_power_up_timer(&mut self, scur: i64) -> Result<(), ControllerError> {
        if self.reserves.m == 0 {
            return Ok(());
        }
        if scur <= self.reserves.d as i64 {
            self.state = ReserveState::Off;
            info!(scur, "surge gone, switched POWERING_ON -> OFF");
        } else {
            self.enable_reserves().await?;
            self.state = ReserveState::On;
            info!(scur, "switched POWERING_ON -> ON");
        }
        Ok(())
    }

    /// Reruns the heuristic against `lambda` and reclassifies the fleet
    /// to match the new `m`, then reconciles the proxy (§4.5.2).
    pub async fn reconfigure(&mut self, lambda: f64) -> Result<(), ControllerError> {
        let n = self.fleet.members().len() as u32;
        let lambda = self.arrival_source.lambda_for(self.epoch, lambda);
        if lambda <= 0.0 {
            self.epoch += 1;
            return Ok(());
        }

        let heuristic = Heuristic::new(n, self.nu, self.costs, self.core_multiplier);
        let load = Load::new(lambda, self.mu);
        let solution = match heuristic.heuristic(load) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "reconfiguration heuristic failed, keeping current policy");
                self.epoch += 1;
                return Ok(());
            }
        };

        if solution.reserves.m == self.reserves.m {
            info!("nothing to do, reserve count unchanged");
            self.reserves = solution.reserves;
            self.epoch += 1;
            return Ok(());
        }

        let reclass = self.fleet.reclassify(solution.reserves.m);
        self.reconcile_after_reclassify(&reclass).await?;
        self.reserves = solution.reserves;
        self.epoch += 1;
        Ok(())
    }

    /// Issues one `enable`/`disable server` per reclassified node (§4.5.1
    /// step 3): promoted members always end up active; demoted members
    /// follow the current reserve state (still active while reserves are
    /// ON/POWERING_ON, disabled once reserves are OFF). Verifies `act`
    /// against the expected count and escalates to Recovery on mismatch.
    async fn reconcile_after_reclassify(
        &mut self,
        reclass: &crate::fleet::Reclassification,
    ) -> Result<(), ControllerError> {
        if reclass.is_empty() {
            return Ok(());
        }

        let keep_reserves_enabled = self.state != ReserveState::Off;

        for id in &reclass.promoted {
            self.enable_server(id).await?;
        }
        for id in &reclass.demoted {
            if keep_reserves_enabled {
                self.enable_server(id).await?;
            } else {
                self.disable_server(id).await?;
            }
        }

        let expected = self.fleet.always_on_ids().len() as u32
            + if keep_reserves_enabled { self.fleet.reserve_ids().len() as u32 } else { 0 };
        let active = self.read_active_count().await?;

        if active as u32 != expected {
            warn!(expected, active, "act disagrees after reclassification, invoking recovery");
            self.recovery(keep_reserves_enabled, expected).await?;
        } else {
            self.recovery_escalations = 0;
        }
        Ok(())
    }

    async fn read_active_count(&mut self) -> Result<i64, ControllerError> {
        let stats = match self.client.show_stat().await {
            Ok(stats) => stats,
            Err(_) => {
                self.client.reconnect().await?;
                self.client.show_stat().await?
            }
        };
        Ok(stats
            .table
            .values()
            .find_map(|s| s.get("BACKEND"))
            .map(|b| b.act)
            .unwrap_or(0))
    }

    /// Recovery (§4.5.3): re-sends `enable server` for every always-on
    /// member and `enable`/`disable server` for every reserve depending on
    /// `enable`, then re-polls. On a second consecutive mismatch, rebuilds
    /// the socket and retries once more; a failure after that is fatal.
    async fn recovery(&mut self, enable: bool, expected: u32) -> Result<(), ControllerError> {
        warn!("recovery");
        for attempt in 0..2 {
            let always_on: Vec<String> = self.fleet.always_on_ids().into_iter().map(String::from).collect();
            let reserves: Vec<String> = self.fleet.reserve_ids().into_iter().map(String::from).collect();

            for id in &always_on {
                self.enable_server(id).await?;
            }
            for id in &reserves {
                if enable {
                    self.enable_server(id).await?;
                } else {
                    self.disable_server(id).await?;
                }
            }

            let active = self.read_active_count().await?;
            if active as u32 == expected {
                self.recovery_escalations = 0;
                return Ok(());
            }

            self.recovery_escalations += 1;
            warn!(attempt, expected, active, "recovery attempt failed");
            if attempt == 0 {
                self.client.reconnect().await?;
            }
        }

        Err(ControllerError::RecoveryFailed {
            expected,
            actual: self.read_active_count().await?,
        })
    }

    /// Issues `enable server`, reconnecting and retrying once on a
    /// transient `SocketError` (§7: "transient I/O is retried with
    /// reconnect" — this applies to every socket send, not just polling).
    async fn enable_server(&mut self, id: &str) -> Result<(), ControllerError> {
        match self.client.enable_server(BACKEND_NAME, id).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.client.reconnect().await?;
                Ok(self.client.enable_server(BACKEND_NAME, id).await?)
            }
        }
    }

    /// Issues `disable server` with the same reconnect-and-retry-once
    /// policy as `enable_server`.
    async fn disable_server(&mut self, id: &str) -> Result<(), ControllerError> {
        match self.client.disable_server(BACKEND_NAME, id).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.client.reconnect().await?;
                Ok(self.client.disable_server(BACKEND_NAME, id).await?)
            }
        }
    }

    async fn enable_reserves(&mut self) -> Result<(), ControllerError> {
        let ids: Vec<String> = self.fleet.reserve_ids().into_iter().map(String::from).collect();
        for id in ids {
            self.enable_server(&id).await?;
        }
        Ok(())
    }

    async fn disable_reserves(&mut self) -> Result<(), ControllerError> {
        let ids: Vec<String> = self.fleet.reserve_ids().into_iter().map(String::from).collect();
        for id in ids {
            self.disable_server(&id).await?;
        }
        Ok(())
    }

    async fn disable_all_reserves(&mut self) -> Result<(), ControllerError> {
        self.disable_reserves().await?;
        self.state = ReserveState::Off;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    #[test]
    fn arrival_rate_source_measured_ignores_epoch() {
        let src = ArrivalRateSource::Measured;
        assert_eq!(src.lambda_for(5, 3.0), 3.0);
    }

    #[test]
    fn arrival_rate_source_oracle_falls_back_to_measured_past_trace_end() {
        let src = ArrivalRateSource::Oracle(vec![1.0, 2.0]);
        assert_eq!(src.lambda_for(0, 9.0), 1.0);
        assert_eq!(src.lambda_for(5, 9.0), 9.0);
    }

    /// Same fixed-column `show stat` row format exercised in `stats.rs`'s
    /// tests: a single BACKEND row under iid=2, type=1.
    fn sample_backend_row(scur: i64, stot: i64, act: i64) -> String {
        format!(
            "www,BACKEND,0,0,{scur},0,0,{stot},0,0,0,0,0,0,0,0,0,UP,1,{act},0,0,0,0,0,0,1,2,0,0,0,,1,0,0,0,,0,0,0,0,0,0,0,0,,0,0,0,0,0",
        )
    }

    /// A minimal admin-socket double: answers `show stat` with a canned
    /// row, acknowledges every other command with the bare prompt, and
    /// records every command it was asked to run.
    async fn fake_proxy(mut server: UnixStream, stat_line: String, log: Arc<Mutex<Vec<String>>>) {
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match server.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let cmd = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            if cmd == "show stat" {
                let reply = format!("# header\n{}\n> ", stat_line);
                if server.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            } else if cmd == "quit" {
                return;
            } else {
                log.lock().unwrap().push(cmd);
                if server.write_all(b"> ").await.is_err() {
                    return;
                }
            }
        }
    }

    fn test_controller(
        client: AdminClient,
        fleet: Fleet,
        reserves: Reserves,
        reconf_interval: Duration,
    ) -> Controller {
        Controller::new(
            client,
            fleet,
            reserves,
            4.35,
            1.0 / 60.0,
            Costs::new(1.2, 1.0),
            1,
            Duration::from_secs(1),
            reconf_interval,
            true,
            ArrivalRateRecorder::new(None).unwrap(),
            CostRecorder::new(1.2, 1.0, None).unwrap(),
            ArrivalRateSource::Measured,
        )
    }

    fn ten_member_fleet(m: u32) -> Fleet {
        Fleet::init((0..10).map(|i| (format!("srv{i}"), format!("10.0.0.{i}:80"))), m)
    }

    fn sent_enables(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("enable server"))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn scenario_d_surge_arms_power_up_timer_without_enabling_yet() {
        let (client_half, server_half) = UnixStream::pair().expect("socket pair");
        let log = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(fake_proxy(server_half, sample_backend_row(50, 10_000, 8), log.clone()));

        let client = AdminClient::from_parts("test", client_half);
        let mut controller = test_controller(client, ten_member_fleet(2), Reserves::new(2, 10, 40), Duration::ZERO);

        controller.tick(Instant::now()).await.unwrap();

        assert_eq!(controller.state(), ReserveState::PoweringOn);
        assert!(sent_enables(&log).is_empty());
    }

    #[tokio::test]
    async fn scenario_e_timer_expiry_with_surge_gone_collapses_to_off() {
        let (client_half, server_half) = UnixStream::pair().expect("socket pair");
        let log = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(fake_proxy(server_half, sample_backend_row(5, 20_000, 8), log.clone()));

        let client = AdminClient::from_parts("test", client_half);
        let mut controller = test_controller(client, ten_member_fleet(2), Reserves::new(2, 10, 40), Duration::ZERO);
        controller.state = ReserveState::PoweringOn;
        controller.power_up_deadline = Some(Instant::now() - Duration::from_millis(10));

        controller.tick(Instant::now()).await.unwrap();

        assert_eq!(controller.state(), ReserveState::Off);
        assert!(sent_enables(&log).is_empty());
    }

    #[tokio::test]
    async fn scenario_f_reconfigure_demotes_six_reserves_to_four_with_two_enables() {
        let (client_half, server_half) = UnixStream::pair().expect("socket pair");
        let log = Arc::new(Mutex::new(Vec::new()));
        // act=6 matches the post-reclassification always-on count (10-4),
        // so reconciliation succeeds without escalating to recovery.
        tokio::spawn(fake_proxy(server_half, sample_backend_row(0, 0, 6), log.clone()));

        let client = AdminClient::from_parts("test", client_half);
        let mut controller = test_controller(
            client,
            ten_member_fleet(6),
            Reserves::new(6, 0, 10),
            Duration::from_secs(3600),
        );

        controller.reconfigure(15.0).await.unwrap();

        assert_eq!(controller.reserves().m, 4);
        let enables = sent_enables(&log);
        assert_eq!(enables.len(), 2);
        assert!(enables.contains(&"enable server www/srv0".to_string()));
        assert!(enables.contains(&"enable server www/srv1".to_string()));
    }
}
