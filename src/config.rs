//! CLI configuration surface: a `clap::Parser` mirroring the original
//! monitor's flag table, plus the startup validation clap can't express.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::model::{Costs, InvalidConfig, Reserves};

/// Autonomic capacity controller for a fleet of HTTP backends behind a
/// layer-7 reverse proxy.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Service rate (jobs/sec per server)
    #[arg(long = "mu", default_value_t = 4.35)]
    pub mu: f64,

    /// Number of reserve servers
    #[arg(short = 'm', long = "reserves")]
    pub m: u32,

    /// Lower queue threshold
    #[arg(short = 'D', long = "lower-threshold")]
    pub d: u32,

    /// Upper queue threshold
    #[arg(short = 'U', long = "upper-threshold")]
    pub u: u32,

    /// Holding cost, $ per job per second
    #[arg(long = "c1", default_value_t = 1.2)]
    pub c1: f64,

    /// Server cost, $ per server per second
    #[arg(long = "c2", default_value_t = 1.0)]
    pub c2: f64,

    /// Average seconds required to power up reserves
    #[arg(short = 'p', long = "power-up-secs", default_value_t = 60.0)]
    pub power_up_secs: f64,

    /// Monitoring interval, in seconds
    #[arg(long = "mon", default_value_t = 1)]
    pub monitor_interval_secs: u64,

    /// Reconfiguration interval, in seconds (0 disables reconfiguration)
    #[arg(short = 'r', long = "reconf-secs", default_value_t = 3600)]
    pub reconf_interval_secs: u64,

    /// Number of cores per server
    #[arg(long = "co", default_value_t = 2)]
    pub cores: u32,

    /// Path to a file with a recorded arrival-rate trace (oracle mode)
    #[arg(short = 'o', long = "oracle")]
    pub oracle: Option<PathBuf>,

    /// Enable the D/U threshold policy (only meaningful if reconf_interval > 0)
    #[arg(short = 't', long = "thresholds", default_value_t = true)]
    pub thresholds_enabled: bool,

    /// Path to the proxy's admin UNIX socket
    #[arg(long = "socket", default_value = "/tmp/haproxy")]
    pub socket_path: PathBuf,
}

impl Args {
    pub fn costs(&self) -> Costs {
        Costs::new(self.c1, self.c2)
    }

    pub fn reserves(&self) -> Reserves {
        Reserves::new(self.m, self.d, self.u)
    }

    pub fn nu(&self) -> f64 {
        1.0 / self.power_up_secs
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn reconf_interval(&self) -> Duration {
        Duration::from_secs(self.reconf_interval_secs)
    }

    /// Validates what clap's own constraints can't express. Run once at
    /// startup, before the event loop starts — never mid-run.
    pub fn validate(&self, n: u32) -> Result<(), InvalidConfig> {
        self.reserves().validate(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_d_greater_than_u() {
        let args = Args {
            mu: 4.35,
            m: 2,
            d: 10,
            u: 5,
            c1: 1.2,
            c2: 1.0,
            power_up_secs: 60.0,
            monitor_interval_secs: 1,
            reconf_interval_secs: 3600,
            cores: 2,
            oracle: None,
            thresholds_enabled: true,
            socket_path: PathBuf::from("/tmp/haproxy"),
        };
        assert!(args.validate(10).is_err());
    }

    #[test]
    fn nu_is_inverse_of_power_up_seconds() {
        let args = Args {
            mu: 4.35,
            m: 0,
            d: 0,
            u: 0,
            c1: 1.2,
            c2: 1.0,
            power_up_secs: 60.0,
            monitor_interval_secs: 1,
            reconf_interval_secs: 3600,
            cores: 2,
            oracle: None,
            thresholds_enabled: true,
            socket_path: PathBuf::from("/tmp/haproxy"),
        };
        assert!((args.nu() - 1.0 / 60.0).abs() < 1e-12);
    }
}
