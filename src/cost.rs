//! C1 — the cost evaluator. Computes the steady-state expected cost of an
//! M/M/N queue with `m` reserve servers gated by thresholds `D` and `U`.
//!
//! Three regimes, selected by `cost()`:
//! - `m == 0`: classical M/M/N (`cost_classical`).
//! - `D == U`: degenerate single-threshold policy (`cost_single_threshold`).
//! - `0 < D < U`: the general recurrence (`cost_general`).

use crate::model::{Costs, CostError, Load, NumericError, Reserves, Solution};

/// Evaluates the steady-state cost of `reserves` under `load`, given the
/// fleet size `N`, reserve power-up rate `nu`, and holding/server costs.
///
/// Pure: no retained state, no I/O. Fails with `CostError::Config` when
/// `D > U` or `m > N`, and with `CostError::Numeric` on overflow, division
/// by zero, or an offered load the fleet cannot serve.
pub fn cost(n: u32, nu: f64, costs: Costs, reserves: Reserves, load: Load) -> Result<Solution, CostError> {
    reserves.validate(n)?;

    if reserves.m == 0 {
        return Ok(cost_classical(n, costs, load)?);
    }
    if reserves.is_degenerate() {
        return Ok(cost_single_threshold(n, nu, costs, reserves.m, reserves.u, load)?);
    }
    Ok(cost_general(n, nu, costs, reserves, load)?)
}

/// Regime (a): classical M/M/N, no reserves. Matches the Erlang-C closed
/// form within numerical tolerance.
pub fn cost_classical(n: u32, costs: Costs, load: Load) -> Result<Solution, NumericError> {
    let rho = load.rho();
    let nf = n as f64;
    if nf <= rho {
        return Err(NumericError::Unstable {
            n,
            mu: load.mu,
            lambda: load.lambda,
        });
    }

    let mut p = 1.0_f64;
    let mut s = 1.0_f64;
    let mut l = 0.0_f64;
    for j in 1..=n {
        let jf = j as f64;
        p = p * rho / jf;
        s += p;
        l += jf * p;
    }

    let h1 = rho / (nf - rho);
    let mut g1 = p * h1;
    let norm = s + g1;
    g1 /= norm;
    l /= norm;
    l += g1 * (nf + 1.0 + h1);

    let c = l * costs.c1 + nf * costs.c2;
    Ok(Solution::new(c, Reserves::new(0, 0, 0)))
}

/// Regime (b): `D == U == k`, the degenerate single-threshold policy. `m`
/// reserves switch on in bulk once the queue exceeds `k`.
pub fn cost_single_threshold(
    n: u32,
    nu: f64,
    costs: Costs,
    m: u32,
    k: u32,
    load: Load,
) -> Result<Solution, NumericError> {
    let rho = load.rho();
    let lam = load.lambda;
    let mu = load.mu;
    let nf = n as f64;
    let active = (n - m) as f64; // N - m, always-on servers

    let reserves = Reserves::new(m, k, k);

    let mut p = 1.0_f64;
    let mut norm = 1.0_f64;
    let mut l = 0.0_f64;
    for j in 1..=k {
        let jf = j as f64;
        if jf < active {
            p = p * rho / jf;
        } else {
            p = p * rho / active;
        }
        norm += p;
        l += jf * p;
    }

    let b = lam + active * mu + nu;
    let disc = b * b - 4.0 * active * lam * mu;
    if disc < 0.0 {
        return Err(NumericError::Overflow {
            at: "cost_single_threshold::z2",
            reserves,
        });
    }
    let z2 = (b + disc.sqrt()) / (2.0 * lam);

    let mut zj = 1.0_f64;
    let h1 = 1.0 / (z2 - 1.0);
    let h2 = 1.0 / (nf * mu - lam);
    if h2.is_infinite() {
        return Err(NumericError::DivisionByZero {
            at: "cost_single_threshold::h2",
            reserves,
        });
    }
    let m1 = 1.0 / mu;
    let g1 = p * h1;
    let g1p = g1 * (k as f64 + 1.0 + h1);

    let (g2, g2p);
    if k + 1 >= n {
        g2 = g1 * nu * z2 * h1 * h2;
        g2p = h2 * (lam * g2 + nu * z2 * h1 * g1p);
    } else {
        let mut p2 = nu * g1 * m1 / (k as f64 + 1.0);
        let mut g2_acc = p2;
        l += (k as f64 + 1.0) * p2;
        for j in 2..(n - k) {
            zj /= z2;
            p2 = (lam * p2 + nu * zj * g1) * m1 / (k as f64 + j as f64);
            g2_acc += p2;
            l += (k as f64 + j as f64) * p2;
        }
        let g22 = h2 * (lam * p2 + nu * g1 * zj * h1);
        g2_acc += g22;
        let g2p_acc = h2
            * (lam * g22
                + nf * lam * p2
                + nu * zj * h1 * ((n - k - 1) as f64 * g1 + g1p));
        g2 = g2_acc;
        g2p = g2p_acc;
    }

    norm += g1 + g2;
    l += g1p + g2p;
    let g1n = g1 / norm;
    let g2n = g2 / norm;
    l /= norm;

    let c = l * costs.c1 + (nf - m as f64 * (1.0 - g1n - g2n)) * costs.c2;
    Ok(Solution::new(c, reserves))
}

/// Regime (c): `0 < D < U`, the general recurrence over (jobs,
/// reserve-state) with forward/backward passes and analytic tail
/// corrections.
pub fn cost_general(n: u32, nu: f64, costs: Costs, reserves: Reserves, load: Load) -> Result<Solution, NumericError> {
    let d = reserves.d;
    let u = reserves.u;
    let m = reserves.m;
    let lam = load.lambda;
    let mu = load.mu;
    let nf = n as f64;
    let active = (n - m) as f64; // N - m

    let rho = load.rho();
    if nf * mu <= lam {
        return Err(NumericError::Unstable {
            n,
            mu: load.mu,
            lambda: load.lambda,
        });
    }

    let mut p = 1.0_f64;
    let mut p0 = 1.0_f64;
    let mut l = 0.0_f64;

    // Step 1: forward p_{0,j}, j = 1..=D
    for j in 1..=d {
        p = p * rho / (j as f64).min(active);
        p0 += p;
        l += j as f64 * p;
    }

    // Step 2: quadratic roots and constants.
    let b = lam + active * mu + nu;
    let disc = b * b - 4.0 * active * lam * mu;
    if disc < 0.0 {
        return Err(NumericError::Overflow {
            at: "cost_general::roots",
            reserves,
        });
    }
    let sqrt_disc = disc.sqrt();
    let z1 = (b - sqrt_disc) / (2.0 * lam);
    let z2 = (b + sqrt_disc) / (2.0 * lam);
    let h1 = 1.0 / (z2 - 1.0);
    let h2 = 1.0 / (nf * mu - lam);
    if h2.is_infinite() {
        return Err(NumericError::DivisionByZero {
            at: "cost_general::h2",
            reserves,
        });
    }
    let m1 = 1.0 / mu;

    // Step 3: r[j], j = 0..(U-D-1), then backward p_{0,j}.
    let span = (u - d) as usize; // U - D
    let mut r = vec![0.0_f64; span];
    r[0] = 1.0 + mu * (u as f64).min(active) / lam;
    for j in 1..span {
        let k_idx = u as i64 - j as i64; // U + 1 - (j+1) = U - j
        let divisor = (k_idx as f64).min(active);
        if r[j - 1].is_infinite() || divisor == 0.0 {
            return Err(NumericError::Overflow {
                at: "cost_general::r",
                reserves,
            });
        }
        r[j] = 1.0 + r[j - 1] * mu * divisor / lam;
        if r[j].is_infinite() || r[j].is_nan() {
            return Err(NumericError::Overflow {
                at: "cost_general::r",
                reserves,
            });
        }
    }
    let p0u = p / r[span - 1];
    p0 += p0u;
    l += u as f64 * p0u;

    for j in 0..(span - 1) {
        let pj = r[j] * p0u;
        p0 += pj;
        l += (u as f64 - (j as f64 + 1.0)) * pj;
    }

    let mut norm = p0;

    // Step 4: warming branch p_{1,j}.
    let mut bj = vec![0.0_f64; span];
    for j in 0..span {
        bj[j] = lam + nu + ((d + j as u32 + 1) as f64).min(active) * mu;
    }

    let (aj, a) = if d < u - 1 {
        let mut aj = vec![0.0_f64; span - 1];
        aj[0] = (d as f64 + 2.0).min(active) * mu / bj[0];
        for j in 1..(span - 1) {
            aj[j] = ((d + j as u32 + 2) as f64).min(active) * mu / (bj[j] - lam * aj[j - 1]);
        }
        let a = aj[span - 2];
        (aj, a)
    } else {
        (vec![], 0.0)
    };

    let mut p1j = vec![0.0_f64; span];
    p1j[span - 1] = p0u * lam * z1 / (bj[span - 1] - lam * a - lam * z1);
    norm += p1j[span - 1];
    l += u as f64 * p1j[span - 1];

    for j in (0..(span - 1)).rev() {
        p1j[j] = aj[j] * p1j[j + 1];
        norm += p1j[j];
        l += (d as f64 + j as f64 + 1.0) * p1j[j];
    }

    let mut p1 = vec![0.0_f64; span];
    p1[span - 1] = p1j[span - 1];
    for j in (0..(span - 1)).rev() {
        p1[j] = p1[j + 1] + p1j[j];
    }

    // Step 5: analytic tail g1/g1', then "reserves on" branch p_{2,j}.
    let g1 = (p0u + p1j[span - 1]) * h1;
    let g1p = g1 * (u as f64 + 1.0 + h1);

    let mut p2 = (p1[0] + g1) * nu * m1 / (d as f64 + 1.0).min(nf);
    norm += p2;
    l += (d as f64 + 1.0) * p2;

    for j in (d + 2)..=u {
        let idx = (j - d - 1) as usize;
        p2 = ((p1[idx] + g1) * nu + p2 * lam) * m1 / (j as f64).min(nf);
        norm += p2;
        l += j as f64 * p2;
    }

    let (g2, g2p);
    if u + 1 < n {
        let mut zj = 1.0_f64;
        for j in (u + 1)..n {
            p2 = (g1 * nu * zj + p2 * lam) * m1 / j as f64;
            norm += p2;
            l += j as f64 * p2;
            if j < n - 1 {
                zj /= z2;
            }
        }
        g2 = (lam * p2 + nu * g1 * zj * h1) * h2;
        g2p = (lam * (g2 + nf * p2) + nu * g1 * zj * h1 * (nf + h1)) * h2;
    } else {
        g2 = (lam * p2 + nu * g1 * z2 * h1) * h2;
        g2p = (lam * (g2 + (u as f64 + 1.0) * p2) + nu * g1 * z2 * h1 * (u as f64 + 1.0 + h1)) * h2;
    }

    norm += g1 + g2;
    l += g1p + g2p;

    if norm == 0.0 || norm.is_infinite() || norm.is_nan() {
        return Err(NumericError::Overflow {
            at: "cost_general::normalize",
            reserves,
        });
    }
    p0 /= norm;
    l /= norm;

    let c = l * costs.c1 + (nf - m as f64 * p0) * costs.c2;
    Ok(Solution::new(c, reserves))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classical_matches_erlang_c_small_system() {
        // Scenario B: N=6, m=0, lambda=3, mu=1.
        let sol = cost_classical(6, Costs::new(1.2, 1.0), Load::new(3.0, 1.0)).unwrap();
        assert!(sol.cost.is_finite());
        assert!(sol.cost > 0.0);
    }

    #[test]
    fn classical_rejects_unstable_load() {
        let err = cost_classical(2, Costs::new(1.0, 1.0), Load::new(10.0, 1.0));
        assert!(matches!(err, Err(NumericError::Unstable { .. })));
    }

    #[test]
    fn general_agrees_with_single_threshold_at_d_eq_u() {
        // Scenario C: m=2, D=4, U=4, N=6, lambda=2, mu=1, nu=1.
        let n = 6;
        let nu = 1.0;
        let costs = Costs::new(1.2, 1.0);
        let load = Load::new(2.0, 1.0);
        let via_reserves = Reserves::new(2, 4, 4);

        let direct = cost_single_threshold(n, nu, costs, 2, 4, load).unwrap();
        let dispatched = cost(n, nu, costs, via_reserves, load).unwrap();

        assert!((direct.cost - dispatched.cost).abs() < 1e-9);
    }

    #[test]
    fn general_case_is_finite_and_positive() {
        // Scenario A parameters, general (m,D,U) once found by the heuristic
        // should be finite; exercise the recurrence directly on a plausible
        // configuration with 0 < D < U.
        let n = 10;
        let nu = 1.0 / 60.0;
        let costs = Costs::new(1.2, 1.0);
        let load = Load::new(4.0, 4.35);
        let reserves = Reserves::new(2, 5, 8);

        let sol = cost(n, nu, costs, reserves, load).unwrap();
        assert!(sol.cost.is_finite());
        assert!(sol.cost > 0.0);
    }

    #[test]
    fn rejects_threshold_order_violation() {
        let reserves = Reserves::new(1, 5, 3);
        let err = cost(6, 1.0, Costs::new(1.0, 1.0), reserves, Load::new(2.0, 1.0));
        assert!(matches!(err, Err(CostError::Config(_))));
    }
}
