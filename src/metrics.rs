//! C6 — metrics recorders. Append-only CSV sinks for the arrival-rate
//! estimate and the running cost, plus the 360-tick confidence-interval
//! window used to report cost stability across a run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::model::Reserves;

/// Width (in update ticks) of a single portion used for the cost
/// confidence interval.
const PORTION_LEN: u64 = 360;
/// Student's t quantile for a 95% CI at the portion count this recorder
/// is calibrated for.
const CI_T_QUANTILE: f64 = 2.2281389;
const MIN_PORTIONS_FOR_CI: usize = 8;

fn csv_sink(path: Option<&Path>, header: &str) -> io::Result<Option<BufWriter<File>>> {
    let Some(path) = path else { return Ok(None) };
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", header)?;
    Ok(Some(writer))
}

/// Tracks the estimated arrival rate from successive `stot` (total
/// sessions) samples, writing one CSV row per update once the rate
/// exceeds 1 job/sec.
pub struct ArrivalRateRecorder {
    created_at: Instant,
    last_time: Instant,
    last_total: i64,
    last_rate: f64,
    counter: u64,
    writer: Option<BufWriter<File>>,
}

impl ArrivalRateRecorder {
    pub fn new(path: Option<&Path>) -> io::Result<Self> {
        let writer = csv_sink(path, "event,time,arr_rate")?;
        let now = Instant::now();
        Ok(ArrivalRateRecorder {
            created_at: now,
            last_time: now,
            last_total: 0,
            last_rate: 0.0,
            counter: 0,
            writer,
        })
    }

    /// Folds in a new `stot` sample, returning the instantaneous rate
    /// (jobs/sec) regardless of whether it passed the logging threshold.
    pub fn update(&mut self, cur_total: i64, cur_time: Instant) -> io::Result<f64> {
        let delta_val = (cur_total - self.last_total) as f64;
        let delta_t = cur_time.duration_since(self.last_time).as_secs_f64();
        let rate = if delta_t > 0.0 { delta_val / delta_t } else { 0.0 };

        if rate > 1.0 {
            self.last_total = cur_total;
            self.last_rate = rate;
            self.last_time = cur_time;
            self.counter += 1;

            if self.counter > 1 {
                if let Some(writer) = self.writer.as_mut() {
                    writeln!(
                        writer,
                        "{},{:.2},{:.2}",
                        self.counter,
                        cur_time.duration_since(self.created_at).as_secs_f64(),
                        self.last_rate
                    )?;
                }
            }
        }
        Ok(rate)
    }

    pub fn arr_rate(&self) -> f64 {
        self.last_rate
    }

    /// Resets the baseline, for use after the proxy reloads and its own
    /// counters reset to zero.
    pub fn reset(&mut self) {
        self.last_total = 0;
    }
}

/// Tracks the running holding + server cost and the 360-tick portions
/// used to compute a 95% confidence interval over the run.
pub struct CostRecorder {
    c1: f64,
    c2: f64,
    created_at: Instant,
    last: Instant,
    counter: u64,
    total_cost: f64,
    avg_cost: f64,
    portions: Vec<f64>,
    writer: Option<BufWriter<File>>,
}

impl CostRecorder {
    pub fn new(c1: f64, c2: f64, path: Option<&Path>) -> io::Result<Self> {
        let writer = csv_sink(
            path,
            "event,time,req_rate,jobs,servers_on,servers_run,cost,avg_cost,tot_cost,m,d,u",
        )?;
        let now = Instant::now();
        Ok(CostRecorder {
            c1,
            c2,
            created_at: now,
            last: now,
            counter: 0,
            total_cost: 0.0,
            avg_cost: 0.0,
            portions: Vec::new(),
            writer,
        })
    }

    /// Folds in one tick's worth of state. `powered_on_servers` includes
    /// servers still in the `POWERING_ON` state, so it is always >=
    /// `active_servers`.
    pub fn update(
        &mut self,
        jobs: i64,
        powered_on_servers: u32,
        active_servers: u32,
        cur_time: Instant,
        arr_rate: f64,
        reserves: Reserves,
    ) -> io::Result<()> {
        debug_assert!(active_servers <= powered_on_servers);

        self.counter += 1;
        let delta = cur_time.duration_since(self.last).as_secs_f64();
        self.last = cur_time;

        if jobs > 0 || powered_on_servers > 0 {
            let cost = delta * (jobs as f64 * self.c1 + powered_on_servers as f64 * self.c2);
            self.total_cost += cost;
            let elapsed = self.last.duration_since(self.created_at).as_secs_f64();
            if elapsed > 0.0 {
                self.avg_cost = self.total_cost / elapsed;
            }

            if let Some(writer) = self.writer.as_mut() {
                writeln!(
                    writer,
                    "{},{:.2},{:.3},{},{},{},{:.3},{:.3},{:.1},{},{},{}",
                    self.counter,
                    elapsed,
                    arr_rate,
                    jobs,
                    powered_on_servers,
                    active_servers,
                    cost,
                    self.avg_cost,
                    self.total_cost,
                    reserves.m,
                    reserves.d,
                    reserves.u,
                )?;
            }
        }

        if self.counter % PORTION_LEN == 0 {
            self.portions.push(self.total_cost);
        }
        Ok(())
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn avg_cost(&self) -> f64 {
        self.avg_cost
    }

    /// 95% confidence interval over the per-portion cost rate, or `None`
    /// if fewer than 8 portions have elapsed yet.
    pub fn confidence_interval(&self) -> Option<f64> {
        let portions = self.portions.len();
        if portions < MIN_PORTIONS_FOR_CI {
            return None;
        }

        let mut rates = self.portions.clone();
        for i in (1..portions).rev() {
            rates[i] -= rates[i - 1];
        }
        for rate in rates.iter_mut() {
            *rate /= PORTION_LEN as f64;
        }

        let avg = self.avg_cost;
        let sum_sq: f64 = rates.iter().map(|r| (r - avg).powi(2)).sum();
        let sd = (sum_sq / (portions as f64 - 1.0)).sqrt();
        Some(CI_T_QUANTILE * sd / (portions as f64 - 1.0).sqrt())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn arrival_rate_below_one_per_sec_does_not_advance_baseline() {
        let mut rec = ArrivalRateRecorder::new(None).unwrap();
        let t0 = Instant::now();
        let rate = rec.update(1, t0 + Duration::from_secs(5)).unwrap();
        assert!(rate <= 1.0);
        assert_eq!(rec.last_total, 0);
    }

    #[test]
    fn arrival_rate_above_threshold_advances_baseline_and_reports_rate() {
        let mut rec = ArrivalRateRecorder::new(None).unwrap();
        let t0 = Instant::now();
        let rate = rec.update(100, t0 + Duration::from_secs(1)).unwrap();
        assert!(rate > 1.0);
        assert_eq!(rec.last_total, 100);
    }

    #[test]
    fn reset_clears_the_baseline_total() {
        let mut rec = ArrivalRateRecorder::new(None).unwrap();
        let t0 = Instant::now();
        rec.update(100, t0 + Duration::from_secs(1)).unwrap();
        rec.reset();
        assert_eq!(rec.last_total, 0);
    }

    #[test]
    fn cost_recorder_accumulates_total_cost() {
        let mut rec = CostRecorder::new(1.2, 1.0, None).unwrap();
        let t0 = Instant::now();
        rec.update(5, 3, 3, t0 + Duration::from_secs(1), 2.0, Reserves::new(1, 2, 8))
            .unwrap();
        assert!(rec.total_cost() > 0.0);
    }

    #[test]
    fn confidence_interval_is_none_before_eight_portions() {
        let rec = CostRecorder::new(1.2, 1.0, None).unwrap();
        assert_eq!(rec.confidence_interval(), None);
    }
}
