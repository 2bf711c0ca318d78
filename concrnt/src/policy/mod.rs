//! Per-resource access policy
//!
//! A policy maps action names (`timeline.distribute`, `timeline.update`,
//! `invite`, ...) to statements whose condition is a small expression tree
//! evaluated over the request context. Evaluation is pure and
//! deterministic; anything that goes wrong degrades to `Default`, never to
//! an allow.

mod engine;
mod service;

pub use engine::{Expr, Policy, PolicyEvalResult, Statement};
pub use service::PolicyService;
