use log::{debug, error, info, warn};
use std::time::Instant;

use crate::checker;
use crate::compiler::{self, Compiled};
use crate::data::{SolveRequest, SolveResponse, SolveStatus};
use crate::decoder;
use crate::domain::Domain;
use crate::engine::{HighsEngine, SolvingEngine};
use crate::error::{Result, TimetableError};
use crate::snapshot::Snapshot;

/// Solves one timetable request with the HiGHS ILP solver.
pub fn solve(request: &SolveRequest) -> Result<SolveResponse> {
    solve_with(&HighsEngine::default(), request)
}

/// Runs the whole pipeline: validate, compile, solve once, decode, check.
pub fn solve_with(engine: &impl SolvingEngine, request: &SolveRequest) -> Result<SolveResponse> {
    let start_time = Instant::now();
    let domain = Domain::new(&request.config)?;
    let snapshot = Snapshot::new(&domain, &request.timetable)?;
    info!(
        "Building {:?} timetable model for {} sections over {} days x {} slots ({} open cells)...",
        domain.strategy,
        domain.sections.len(),
        domain.days.len(),
        domain.slots.len(),
        snapshot.open_count()
    );

    let Compiled { model, plan } = compiler::compile(&domain, &snapshot)?;
    let outcome = engine.solve(model, domain.time_budget);
    let detail = outcome.detail.unwrap_or_else(|| outcome.status.to_string());
    let assignment = match (outcome.status, outcome.assignment) {
        (SolveStatus::Optimal | SolveStatus::Feasible, Some(assignment)) => assignment,
        (SolveStatus::Infeasible, _) => {
            error!("Solver proved the timetable infeasible: {detail}");
            return Err(TimetableError::SolverInfeasible);
        }
        (SolveStatus::ModelInvalid, _) => {
            error!("Solver rejected the model: {detail}");
            return Err(TimetableError::SolverInvalidModel(detail));
        }
        (status, _) => {
            error!("Solver stopped with status {status}: {detail}");
            return Err(TimetableError::SolverUnknown(detail));
        }
    };
    debug!("Engine reported {} watched values.", assignment.len());

    let timetable = decoder::decode(&request.timetable, &domain, &plan, &assignment);
    let unmet_soft_constraints = decoder::unmet_soft_constraints(&domain, &plan, &assignment);
    let unavailability_violations = checker::check_unavailability(&timetable, &domain.unavailability);
    for violation in &unavailability_violations {
        warn!("{violation}");
    }
    info!(
        "Timetable solved with status {} in {:.2?} ({} gap penalties).",
        outcome.status,
        start_time.elapsed(),
        unmet_soft_constraints.len()
    );

    Ok(SolveResponse {
        status: outcome.status,
        timetable,
        gap_penalty: unmet_soft_constraints.len() as u32,
        unmet_soft_constraints,
        unavailability_violations,
    })
}
