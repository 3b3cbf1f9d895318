//! Autonomic capacity controller for a fleet of HTTP backends behind a
//! layer-7 reverse proxy: a queueing-theoretic cost evaluator and policy
//! search (C1/C2), a proxy admin-socket client (C3), a stats parser (C4),
//! the controller event loop (C5), and metrics recorders (C6).

pub mod admin;
pub mod config;
pub mod controller;
pub mod cost;
pub mod fleet;
pub mod metrics;
pub mod model;
pub mod search;
pub mod stats;
