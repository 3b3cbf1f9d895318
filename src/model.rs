//! Shared data types for the capacity controller: load, costs, reserve
//! configurations, solutions and fleet members.

use std::cmp::Ordering;
use std::fmt;

/// Arrival/service rate pair. ρ = λ/μ is the offered load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Load {
    pub lambda: f64,
    pub mu: f64,
}

impl Load {
    pub fn new(lambda: f64, mu: f64) -> Self {
        Load { lambda, mu }
    }

    /// Offered load ρ = λ/μ.
    pub fn rho(&self) -> f64 {
        self.lambda / self.mu
    }
}

/// Holding cost per job per unit time (`c1`) and running-server cost per
/// unit time (`c2`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Costs {
    pub c1: f64,
    pub c2: f64,
}

impl Costs {
    pub fn new(c1: f64, c2: f64) -> Self {
        Costs { c1, c2 }
    }
}

/// A candidate reserve configuration: `m` reserve servers gated by a lower
/// threshold `D` and an upper threshold `U`.
///
/// Equality and ordering follow the data model: equality on the full tuple,
/// total order on `(m, U, D)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Reserves {
    pub m: u32,
    pub d: u32,
    pub u: u32,
}

impl Reserves {
    pub fn new(m: u32, d: u32, u: u32) -> Self {
        Reserves { m, d, u }
    }

    pub fn is_degenerate(&self) -> bool {
        self.d == self.u
    }

    /// Validates the data-model invariants, independent of N or load.
    pub fn validate(&self, n: u32) -> Result<(), InvalidConfig> {
        if self.m > n {
            return Err(InvalidConfig::ReservesExceedFleet { m: self.m, n });
        }
        if self.d > self.u {
            return Err(InvalidConfig::ThresholdOrder {
                d: self.d,
                u: self.u,
            });
        }
        Ok(())
    }
}

impl Ord for Reserves {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.m, self.u, self.d).cmp(&(other.m, other.u, other.d))
    }
}

impl PartialOrd for Reserves {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The paired result of the cost evaluator: a cost and the configuration it
/// was evaluated for. Solutions order by cost alone.
#[derive(Debug, Clone, Copy)]
pub struct Solution {
    pub cost: f64,
    pub reserves: Reserves,
}

impl Solution {
    pub fn new(cost: f64, reserves: Reserves) -> Self {
        Solution { cost, reserves }
    }
}

impl PartialEq for Solution {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl PartialOrd for Solution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.cost.partial_cmp(&other.cost)
    }
}

/// Role of a fleet member within the partition the controller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    AlwaysOn,
    Reserve,
}

/// A single backend server: stable identity, proxy-facing address, and the
/// role it currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetMember {
    pub id: String,
    pub address: String,
    pub role: Role,
}

impl FleetMember {
    pub fn new(id: impl Into<String>, address: impl Into<String>, role: Role) -> Self {
        FleetMember {
            id: id.into(),
            address: address.into(),
            role,
        }
    }
}

/// Reserve power state, owned exclusively by the controller loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveState {
    Off,
    PoweringOn,
    On,
}

/// Numeric failure of the cost evaluator: overflow, division by zero, or a
/// pool that cannot serve the offered load.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericError {
    Unstable { n: u32, mu: f64, lambda: f64 },
    DivisionByZero { at: &'static str, reserves: Reserves },
    Overflow { at: &'static str, reserves: Reserves },
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericError::Unstable { n, mu, lambda } => write!(
                f,
                "offered load unstable: N*mu ({}) <= lambda ({})",
                *n as f64 * mu,
                lambda
            ),
            NumericError::DivisionByZero { at, reserves } => write!(
                f,
                "division by zero in {} for reserves (m={}, D={}, U={})",
                at, reserves.m, reserves.d, reserves.u
            ),
            NumericError::Overflow { at, reserves } => write!(
                f,
                "numeric overflow in {} for reserves (m={}, D={}, U={})",
                at, reserves.m, reserves.d, reserves.u
            ),
        }
    }
}

impl std::error::Error for NumericError {}

/// Configuration that fails the data-model invariants outright, rather than
/// being guessed at or silently clamped.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidConfig {
    ThresholdOrder { d: u32, u: u32 },
    ReservesExceedFleet { m: u32, n: u32 },
}

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidConfig::ThresholdOrder { d, u } => {
                write!(f, "invalid reserve config: D ({}) > U ({})", d, u)
            }
            InvalidConfig::ReservesExceedFleet { m, n } => {
                write!(f, "invalid reserve config: m ({}) > N ({})", m, n)
            }
        }
    }
}

impl std::error::Error for InvalidConfig {}

/// Errors surfaced by the cost evaluator: a config-level rejection or a
/// numeric failure during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum CostError {
    Config(InvalidConfig),
    Numeric(NumericError),
}

impl fmt::Display for CostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostError::Config(e) => write!(f, "{}", e),
            CostError::Numeric(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CostError {}

impl From<InvalidConfig> for CostError {
    fn from(e: InvalidConfig) -> Self {
        CostError::Config(e)
    }
}

impl From<NumericError> for CostError {
    fn from(e: NumericError) -> Self {
        CostError::Numeric(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_order_by_m_then_u_then_d() {
        let a = Reserves::new(1, 2, 5);
        let b = Reserves::new(1, 3, 5);
        let c = Reserves::new(2, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn reserves_validate_rejects_d_gt_u() {
        let r = Reserves::new(0, 5, 3);
        assert_eq!(
            r.validate(10),
            Err(InvalidConfig::ThresholdOrder { d: 5, u: 3 })
        );
    }

    #[test]
    fn reserves_validate_rejects_m_gt_n() {
        let r = Reserves::new(5, 0, 0);
        assert_eq!(
            r.validate(4),
            Err(InvalidConfig::ReservesExceedFleet { m: 5, n: 4 })
        );
    }

    #[test]
    fn solution_orders_by_cost_only() {
        let a = Solution::new(10.0, Reserves::new(0, 0, 0));
        let b = Solution::new(5.0, Reserves::new(9, 9, 9));
        assert!(b < a);
    }
}
