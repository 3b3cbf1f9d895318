//! C2 — policy search. Four strategies, all wrapping the C1 cost evaluator:
//! a closed-form O(1) heuristic, an exhaustive baseline, a hill-climbing
//! local search (offline analysis only), and a simulated-annealing refiner.

use std::fmt;

use rand::Rng;

use crate::cost::cost;
use crate::model::{CostError, Costs, Load, Reserves, Solution};

/// Failure of a policy-search strategy: either the underlying cost
/// evaluator rejected every candidate it tried, or no feasible split of
/// the fleet exists for the given core multiplier.
#[derive(Debug)]
pub enum SearchError {
    Cost(CostError),
    NoFeasibleSplit,
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Cost(e) => write!(f, "{}", e),
            SearchError::NoFeasibleSplit => write!(f, "no feasible always-on/reserve split found"),
        }
    }
}

impl std::error::Error for SearchError {}

impl From<CostError> for SearchError {
    fn from(e: CostError) -> Self {
        SearchError::Cost(e)
    }
}

/// M/M/1-approximation heuristic (§4.2). O(1) in the number of servers.
pub struct Heuristic {
    n: u32,
    nu: f64,
    costs: Costs,
    cores: u32,
}

impl Heuristic {
    pub fn new(n: u32, nu: f64, costs: Costs, cores: u32) -> Self {
        Heuristic {
            n,
            nu,
            costs,
            cores: cores.max(1),
        }
    }

    /// Equation 45: the always-on server count under an M/M/1 approximation.
    fn compute_n(&self, load: Load) -> i64 {
        let rho = load.rho();
        let inner = 1.0 + 4.0 * rho * (self.costs.c1 / self.costs.c2);
        (rho + 0.5 * (1.0 + inner.sqrt())).floor() as i64
    }

    fn compute_queue_thresholds(&self, m: u32) -> (u32, u32) {
        let d = (self.n.saturating_sub(m)).saturating_sub(1);
        (d, self.n)
    }

    fn solve(&self, reserves: Reserves, load: Load) -> Result<Solution, CostError> {
        cost(self.n, self.nu, self.costs, reserves, load)
    }

    fn reserves_for(&self, always_on: i64) -> Reserves {
        let m = (self.n as i64 - always_on).max(0) as u32;
        let (d, u) = self.compute_queue_thresholds(m);
        Reserves::new(m, d, u)
    }

    /// Runs the heuristic, rounding `m` to a multiple of the configured
    /// core multiplier by evaluating both roundings and keeping the
    /// cheaper one.
    pub fn heuristic(&self, load: Load) -> Result<Solution, SearchError> {
        let n_star = self.compute_n(load);
        let m = (self.n as i64 - n_star).max(0) as u32;
        let diff = m % self.cores;

        if diff == 0 {
            return Ok(self.solve(self.reserves_for(n_star), load)?);
        }

        let diff = diff as i64;
        let n1 = n_star + diff;
        let n2 = n_star - diff;

        let candidate_low = if n2 > 0 {
            Some(self.reserves_for(n2))
        } else {
            None
        };
        let candidate_high = if n1 < self.n as i64 {
            Some(self.reserves_for(n1))
        } else {
            None
        };

        match (candidate_low, candidate_high) {
            (None, None) => Err(SearchError::NoFeasibleSplit),
            (Some(r), None) => Ok(self.solve(r, load)?),
            (None, Some(r)) => Ok(self.solve(r, load)?),
            (Some(lo), Some(hi)) => {
                let sol_lo = self.solve(lo, load)?;
                let sol_hi = self.solve(hi, load)?;
                Ok(if sol_lo.cost < sol_hi.cost { sol_lo } else { sol_hi })
            }
        }
    }
}

/// Exhaustive search over the full (m, D, U) space; the search baseline
/// used to validate the heuristic and simulated annealing.
pub struct Exhaustive {
    n: u32,
    nu: f64,
    costs: Costs,
}

impl Exhaustive {
    pub fn new(n: u32, nu: f64, costs: Costs) -> Self {
        Exhaustive { n, nu, costs }
    }

    pub fn search(&self, load: Load) -> Result<Solution, SearchError> {
        let rho = load.rho();
        let min_u = rho.floor().max(0.0) as u32;
        let mut best = cost(self.n, self.nu, self.costs, Reserves::new(0, 0, 0), load)?;

        for m in 0..self.n {
            for u in min_u..80 {
                for d in 0..u {
                    let reserves = Reserves::new(m, d, u);
                    if let Ok(candidate) = cost(self.n, self.nu, self.costs, reserves, load) {
                        if candidate.cost < best.cost {
                            best = candidate;
                        }
                    }
                }
            }
        }
        Ok(best)
    }
}

/// Simulated annealing refiner (§4.2). Non-standard acceptance rule that
/// favours wide exploration while the temperature is still high.
pub struct SimulatedAnnealing {
    n: u32,
    nu: f64,
    costs: Costs,
    cores: u32,
}

const SA_MAX_ITER: u32 = 25_000;
const SA_MAX_TEMP: f64 = 10_000.0;
const SA_TEMP_CHANGE: f64 = 0.999;

impl SimulatedAnnealing {
    pub fn new(n: u32, nu: f64, costs: Costs, cores: u32) -> Self {
        SimulatedAnnealing {
            n,
            nu,
            costs,
            cores: cores.max(1),
        }
    }

    /// Default starting point: avoids the heuristic's large upper
    /// thresholds, which can overflow the recurrence.
    fn default_solution(&self, load: Load) -> Reserves {
        let mut n_count = (load.rho() + 0.5).round() as i64;
        let cores = self.cores as i64;
        if n_count % cores != 0 {
            n_count += n_count % cores;
        }
        if n_count > self.n as i64 {
            n_count -= cores;
        }
        let m = (self.n as i64 - n_count).max(0) as u32;
        let d = (n_count - 1).max(0) as u32;
        Reserves::new(m, d, self.n)
    }

    /// Feasible unit-step (or core-step) moves from `cur`, matching the
    /// neighbour generator's nine candidate shapes.
    fn neighbors(&self, cur: Reserves) -> Vec<Reserves> {
        let m = cur.m as i64;
        let d = cur.d as i64;
        let u = cur.u as i64;
        let n = self.n as i64;
        let cores = self.cores as i64;
        let max_u = n * 3;
        let mut out = Vec::with_capacity(9);

        if m > cores && u >= n - (m - cores) - 1 {
            out.push(Reserves::new((m - cores) as u32, d as u32, u as u32));
        }
        if m < n - cores && u >= n - (m + cores) - 1 {
            out.push(Reserves::new((m + cores) as u32, d as u32, u as u32));
        }
        if d > 0 {
            out.push(Reserves::new(m as u32, (d - 1) as u32, u as u32));
        }
        if d > 0 && u >= n - m - 2 {
            out.push(Reserves::new(m as u32, (d - 1) as u32, (u - 1) as u32));
        }
        if d < u {
            out.push(Reserves::new(m as u32, (d + 1) as u32, u as u32));
        }
        if u >= n - m - 2 && u - 1 >= d {
            out.push(Reserves::new(m as u32, d as u32, (u - 1) as u32));
        }
        if u < max_u {
            out.push(Reserves::new(m as u32, d as u32, (u + 1) as u32));
            out.push(Reserves::new(m as u32, (d + 1) as u32, (u + 1) as u32));
        }
        if m > cores && d > 0 {
            out.push(Reserves::new((m - cores) as u32, (d - 1) as u32, u as u32));
        }
        if u - 1 >= d && u - 1 >= n - (m + cores) - 1 && m + cores < n {
            out.push(Reserves::new((m + cores) as u32, d as u32, (u - 1) as u32));
        }
        out
    }

    /// Runs simulated annealing from `initial` (or the default starting
    /// point), returning the best solution seen.
    pub fn search(
        &self,
        load: Load,
        initial: Option<Reserves>,
        rng: &mut impl Rng,
    ) -> Result<Solution, SearchError> {
        let initial_reserves = initial.unwrap_or_else(|| self.default_solution(load));
        let initial_sol = cost(self.n, self.nu, self.costs, initial_reserves, load)?;

        let mut s = initial_sol;
        let mut sbest = initial_sol;
        let mut ebest = initial_sol.cost;
        let mut temp = SA_MAX_TEMP;
        let mut iter = 0u32;

        while iter < SA_MAX_ITER && s.cost > 0.0 {
            let candidates = self.neighbors(s.reserves);
            if candidates.is_empty() {
                break;
            }
            let idx = rng.gen_range(0..candidates.len());
            let chosen = candidates[idx];

            let snew = match cost(self.n, self.nu, self.costs, chosen, load) {
                Ok(v) => v,
                Err(_) => {
                    iter += 1;
                    continue;
                }
            };

            // Open Question (i): the D==U gate compares actual threshold
            // values, not bound-method identities.
            let gated = snew.reserves.is_degenerate();
            let eligible = if gated {
                snew.reserves.u >= self.n.saturating_sub(snew.reserves.m).saturating_sub(1)
            } else {
                true
            };

            if eligible {
                let enew = snew.cost;
                temp *= SA_TEMP_CHANGE;
                let delta_e = (s.cost - snew.cost).exp() / temp;
                if delta_e > rng.gen::<f64>() {
                    s = snew;
                }
                if enew < ebest {
                    sbest = snew;
                    ebest = enew;
                }
            }
            iter += 1;
        }
        Ok(sbest)
    }
}

/// Hill-climbing local search (§4.2). Not used in steady-state operation;
/// kept for offline analysis of candidate starting points.
pub struct HillClimbing {
    n: u32,
    nu: f64,
    costs: Costs,
}

impl HillClimbing {
    pub fn new(n: u32, nu: f64, costs: Costs) -> Self {
        HillClimbing { n, nu, costs }
    }

    fn candidate_moves(&self, tmp: Reserves) -> Vec<Reserves> {
        let mut out = Vec::with_capacity(8);
        if tmp.m > 0 {
            out.push(Reserves::new(tmp.m - 1, tmp.d, tmp.u));
        }
        if tmp.m < self.n {
            out.push(Reserves::new(tmp.m + 1, tmp.d, tmp.u));
        }
        if tmp.d > 0 {
            out.push(Reserves::new(tmp.m, tmp.d - 1, tmp.u));
        }
        if tmp.d < tmp.u {
            out.push(Reserves::new(tmp.m, tmp.d + 1, tmp.u));
        }
        if tmp.u > tmp.d {
            out.push(Reserves::new(tmp.m, tmp.d, tmp.u - 1));
        }
        out.push(Reserves::new(tmp.m, tmp.d, tmp.u + 1));
        out.push(Reserves::new(tmp.m, tmp.d + 1, tmp.u + 1));
        if tmp.d > 0 {
            out.push(Reserves::new(tmp.m, tmp.d - 1, tmp.u - 1));
        }
        out
    }

    /// Climbs from `(m, d, u)` to a local minimum, accepting any
    /// strictly-non-worse neighbour at each step.
    pub fn climb(&self, initial: Reserves, load: Load) -> Result<Solution, SearchError> {
        let mut best = cost(self.n, self.nu, self.costs, initial, load)?;
        loop {
            let mut improved = false;
            let candidates = self.candidate_moves(best.reserves);
            for conf in candidates {
                if let Ok(candidate) = cost(self.n, self.nu, self.costs, conf, load) {
                    if candidate.cost <= best.cost {
                        improved = true;
                        best = candidate;
                    }
                }
            }
            if !improved {
                break;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn scenario_a() -> (u32, f64, Costs, Load) {
        (10, 1.0 / 60.0, Costs::new(1.2, 1.0), Load::new(4.0, 4.35))
    }

    #[test]
    fn heuristic_respects_bounds_and_core_multiple() {
        let (n, nu, costs, load) = scenario_a();
        let h = Heuristic::new(n, nu, costs, 2);
        let sol = h.heuristic(load).unwrap();
        assert!(sol.reserves.m <= n);
        assert!(sol.reserves.d <= sol.reserves.u);
        assert_eq!(sol.reserves.m % 2, 0);
    }

    #[test]
    fn exhaustive_minimum_no_worse_than_heuristic() {
        let (n, nu, costs, load) = scenario_a();
        let h = Heuristic::new(n, nu, costs, 1);
        let heuristic_sol = h.heuristic(load).unwrap();

        let ex = Exhaustive::new(n, nu, costs);
        let best = ex.search(load).unwrap();

        assert!(best.cost <= heuristic_sol.cost + 1e-9);
    }

    #[test]
    fn simulated_annealing_is_near_exhaustive_on_small_n() {
        let n = 6;
        let nu = 1.0;
        let costs = Costs::new(1.2, 1.0);
        let load = Load::new(2.0, 1.0);

        let ex = Exhaustive::new(n, nu, costs);
        let best = ex.search(load).unwrap();

        let sa = SimulatedAnnealing::new(n, nu, costs, 1);
        let mut rng = StdRng::seed_from_u64(42);
        let sol = sa.search(load, None, &mut rng).unwrap();

        assert!(sol.cost <= best.cost * 1.25);
    }

    #[test]
    fn hill_climb_terminates_at_a_local_minimum() {
        let (n, nu, costs, load) = scenario_a();
        let hc = HillClimbing::new(n, nu, costs);
        let seed = Reserves::new(2, 5, 8);
        let sol = hc.climb(seed, load).unwrap();
        assert!(sol.cost.is_finite());
    }
}
