use good_lp::{default_solver, ResolutionError, Solution, SolverModel};
use log::{debug, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::data::SolveStatus;
use crate::encoding::CompiledModel;

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    values: Vec<f64>,
}

impl Assignment {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, watch: usize) -> f64 {
        self.values[watch]
    }

    pub fn is_set(&self, watch: usize) -> bool {
        self.values[watch] > 0.5
    }
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub status: SolveStatus,
    /// Present exactly when the status is `Optimal` or `Feasible`.
    pub assignment: Option<Assignment>,
    pub detail: Option<String>,
}

impl EngineOutcome {
    fn failed(status: SolveStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            assignment: None,
            detail: Some(detail.into()),
        }
    }
}

pub trait SolvingEngine {
    fn solve(&self, model: CompiledModel, budget: Duration) -> EngineOutcome;
}

/// HiGHS through `good_lp`, configured for reproducible runs.
#[derive(Debug, Clone)]
pub struct HighsEngine {
    pub threads: i32,
    pub random_seed: i32,
    pub log_to_console: bool,
}

impl Default for HighsEngine {
    fn default() -> Self {
        Self {
            threads: 1,
            random_seed: 1234,
            log_to_console: false,
        }
    }
}

const INTEGRALITY_TOLERANCE: f64 = 1e-4;

impl SolvingEngine for HighsEngine {
    fn solve(&self, model: CompiledModel, budget: Duration) -> EngineOutcome {
        let CompiledModel {
            problem,
            objective,
            constraints,
            watched,
        } = model;
        if watched.is_empty() {
            info!("Model has no decisions; nothing to solve.");
            return EngineOutcome {
                status: SolveStatus::Optimal,
                assignment: Some(Assignment::new(Vec::new())),
                detail: None,
            };
        }

        let start_time = Instant::now();
        let mut solver_model = problem
            .minimise(objective)
            .using(default_solver)
            .set_option("threads", self.threads)
            .set_option("random_seed", self.random_seed)
            .set_option("time_limit", budget.as_secs_f64())
            .set_option("log_to_console", if self.log_to_console { "true" } else { "false" });
        for c in constraints {
            solver_model.add_constraint(c);
        }

        info!("Starting ILP solver with a {:.0?} budget...", budget);
        let solution = match solver_model.solve() {
            Ok(s) => s,
            Err(ResolutionError::Infeasible) => {
                return EngineOutcome::failed(SolveStatus::Infeasible, "the problem is infeasible");
            }
            Err(ResolutionError::Unbounded) => {
                return EngineOutcome::failed(SolveStatus::ModelInvalid, "the objective is unbounded");
            }
            Err(ResolutionError::Other(reason)) if is_model_error(reason) => {
                return EngineOutcome::failed(SolveStatus::ModelInvalid, reason);
            }
            Err(e) => return EngineOutcome::failed(SolveStatus::Unknown, e.to_string()),
        };
        let duration = start_time.elapsed();
        info!("Solver returned in {:.2?}", duration);

        // good_lp hides the HiGHS model status, so a time-limit stop with no incumbent
        // still comes back as Ok and panics on the first value read. Catching it only
        // works with panic = "unwind" (the default; keep it out of Cargo profiles).
        let values = match catch_unwind(AssertUnwindSafe(|| {
            watched.iter().map(|var| solution.value(*var)).collect::<Vec<f64>>()
        })) {
            Ok(values) => values,
            Err(_) => {
                warn!("Solver stopped without a readable solution.");
                return EngineOutcome::failed(SolveStatus::Unknown, "no incumbent solution");
            }
        };
        if let Some(bad) = values.iter().find(|v| (*v - v.round()).abs() > INTEGRALITY_TOLERANCE) {
            warn!("Solver returned a fractional decision value {bad}.");
            return EngineOutcome::failed(SolveStatus::Unknown, "fractional solution");
        }

        // same blind spot: a time-limit stop looks like a proven optimum
        let status = if duration >= budget {
            debug!("Time budget exhausted; reporting the best solution found.");
            SolveStatus::Feasible
        } else {
            SolveStatus::Optimal
        };
        EngineOutcome {
            status,
            assignment: Some(Assignment::new(values)),
            detail: None,
        }
    }
}

fn is_model_error(reason: &str) -> bool {
    matches!(reason, "LoadError" | "ModelError" | "ModelEmpty")
}
