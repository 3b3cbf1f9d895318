//! Canned `(N, λ, μ, c1, c2, ν)` scenarios used to compare the four C2
//! policy-search strategies offline, away from a live proxy.

use reservectl::model::{Costs, Load};

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub n: u32,
    pub lambda: f64,
    pub mu: f64,
    pub c1: f64,
    pub c2: f64,
    pub nu: f64,
    pub cores: u32,
}

impl Scenario {
    pub fn load(&self) -> Load {
        Load::new(self.lambda, self.mu)
    }

    pub fn costs(&self) -> Costs {
        Costs::new(self.c1, self.c2)
    }

    pub fn all() -> Vec<Scenario> {
        vec![
            Scenario {
                name: "light-load",
                n: 10,
                lambda: 20.0,
                mu: 4.35,
                c1: 1.2,
                c2: 1.0,
                nu: 1.0 / 60.0,
                cores: 1,
            },
            Scenario {
                name: "steady-state",
                n: 20,
                lambda: 60.0,
                mu: 4.35,
                c1: 1.2,
                c2: 1.0,
                nu: 1.0 / 60.0,
                cores: 2,
            },
            Scenario {
                name: "near-saturation",
                n: 20,
                lambda: 82.0,
                mu: 4.35,
                c1: 1.2,
                c2: 1.0,
                nu: 1.0 / 60.0,
                cores: 2,
            },
            Scenario {
                name: "expensive-holding",
                n: 30,
                lambda: 100.0,
                mu: 4.35,
                c1: 5.0,
                c2: 1.0,
                nu: 1.0 / 60.0,
                cores: 4,
            },
            Scenario {
                name: "expensive-servers",
                n: 30,
                lambda: 100.0,
                mu: 4.35,
                c1: 1.0,
                c2: 5.0,
                nu: 1.0 / 60.0,
                cores: 4,
            },
            Scenario {
                name: "slow-power-up",
                n: 20,
                lambda: 60.0,
                mu: 4.35,
                c1: 1.2,
                c2: 1.0,
                nu: 1.0 / 300.0,
                cores: 2,
            },
            Scenario {
                name: "fast-power-up",
                n: 20,
                lambda: 60.0,
                mu: 4.35,
                c1: 1.2,
                c2: 1.0,
                nu: 1.0 / 10.0,
                cores: 2,
            },
            Scenario {
                name: "large-fleet",
                n: 100,
                lambda: 350.0,
                mu: 4.35,
                c1: 1.2,
                c2: 1.0,
                nu: 1.0 / 60.0,
                cores: 8,
            },
        ]
    }

    pub fn from_name(name: &str) -> Option<Scenario> {
        Scenario::all().into_iter().find(|s| s.name == name)
    }
}
