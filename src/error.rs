use thiserror::Error;

/// Every way a timetable run can fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimetableError {
    // ===== before the model is built =====
    #[error("invalid input: {0}")]
    Input(String),

    #[error("section {section} has {actual} open slots but its core subjects need {expected}")]
    FeasibilityMismatch {
        section: String,
        expected: usize,
        actual: usize,
    },

    #[error("fixed assignment {subject} for {section} on {day} at {slot} matches no schedulable class")]
    UnmatchedFixedAssignment {
        section: String,
        subject: String,
        day: String,
        slot: String,
    },

    #[error(
        "fixed assignment {subject} for {section} on {day} at {slot} needs a teacher who is unavailable then"
    )]
    FixedConflictsWithUnavailability {
        section: String,
        subject: String,
        day: String,
        slot: String,
    },

    #[error("lab {lab} of section {section} has no time at which all of its groups can meet")]
    UnsynchronizableLab { section: String, lab: String },

    #[error("room {room} would hold two classes on {day} at {slot}")]
    RoomClash {
        room: String,
        day: String,
        slot: String,
    },

    // ===== reported by the solving engine =====
    #[error("no solution found: the problem is infeasible")]
    SolverInfeasible,

    #[error("no solution found: the model is invalid ({0})")]
    SolverInvalidModel(String),

    #[error("no solution found: solver stopped with status {0}")]
    SolverUnknown(String),

    // ===== after solving =====
    #[error("could not write the timetable artifact: {0}")]
    OutputWrite(String),
}

impl TimetableError {
    /// Stable machine-readable name used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            TimetableError::Input(_) => "input_error",
            TimetableError::FeasibilityMismatch { .. } => "feasibility_mismatch",
            TimetableError::UnmatchedFixedAssignment { .. } => "unmatched_fixed_assignment",
            TimetableError::FixedConflictsWithUnavailability { .. } => "fixed_conflicts_with_unavailability",
            TimetableError::UnsynchronizableLab { .. } => "unsynchronizable_lab",
            TimetableError::RoomClash { .. } => "room_clash",
            TimetableError::SolverInfeasible => "solver_infeasible",
            TimetableError::SolverInvalidModel(_) => "solver_invalid_model",
            TimetableError::SolverUnknown(_) => "solver_unknown",
            TimetableError::OutputWrite(_) => "output_write_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TimetableError>;
