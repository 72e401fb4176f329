use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::checker::UnavailabilityViolation;

// Type aliases for clarity
pub type SectionName = String;
pub type TeacherName = String;
pub type RoomName = String;
pub type DayName = String;
pub type SlotLabel = String;

/// Which encoding the compiler builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One boolean per candidate (section, group, subject, teacher, day, slot, room).
    #[default]
    Full,
    /// One integer "which subject" variable per open cell of the input timetable.
    PartialFill,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub days: Vec<DayName>,
    pub all_slots: Vec<SlotLabel>,
    pub lab_slot_starts: Vec<SlotLabel>,
    pub recess_slots: Vec<SlotLabel>,
    pub solver_timeout_seconds: u64,
    pub strategy: Strategy,
    pub weekly_theory_sessions: usize,
    pub max_theory_per_day: usize,
    pub max_labs_per_group_per_day: usize,
    pub minimize_gaps: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            days: Vec::new(),
            all_slots: Vec::new(),
            lab_slot_starts: Vec::new(),
            recess_slots: Vec::new(),
            solver_timeout_seconds: 30,
            strategy: Strategy::Full,
            weekly_theory_sessions: 3,
            max_theory_per_day: 4,
            max_labs_per_group_per_day: 2,
            minimize_gaps: true,
        }
    }
}

/// A lab offered to a section; every group gets its own teacher because twin
/// sessions run at the same time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabSpec {
    pub name: String,
    pub teachers: BTreeMap<String, TeacherName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FixedAssignment {
    pub section: SectionName,
    pub subject: String,
    pub day: DayName,
    pub slot: SlotLabel,
}

// day -> slot labels
pub type Blackout = BTreeMap<DayName, Vec<SlotLabel>>;

/// The immutable description of the institution for one run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
    pub settings: Settings,
    pub sections: Vec<SectionName>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub section_theory_rooms: BTreeMap<SectionName, RoomName>,
    #[serde(default)]
    pub lab_rooms: Vec<RoomName>,
    /// section -> [subject, teacher] pairs
    #[serde(default)]
    pub subjects: BTreeMap<SectionName, Vec<(String, TeacherName)>>,
    #[serde(default)]
    pub labs: BTreeMap<SectionName, Vec<LabSpec>>,
    #[serde(default)]
    pub core_subjects: BTreeMap<SectionName, Vec<String>>,
    #[serde(default)]
    pub sections_to_solve: Option<Vec<SectionName>>,
    #[serde(default)]
    pub fixed_assignments: Vec<FixedAssignment>,
    #[serde(default)]
    pub teacher_unavailability: BTreeMap<TeacherName, Blackout>,
    #[serde(default)]
    pub section_unavailability: BTreeMap<SectionName, Blackout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CellStatus {
    #[serde(rename = "Assigned")]
    Assigned,
    #[serde(rename = "To Be Assigned")]
    ToBeAssigned,
}

/// One timetable cell. Parallel lab sessions carry compound values such as `"SK / SS"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cell {
    pub status: CellStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl Cell {
    pub fn open() -> Self {
        Self {
            status: CellStatus::ToBeAssigned,
            subject: None,
            teacher: None,
            room: None,
        }
    }

    pub fn assigned(subject: &str, teacher: Option<&str>, room: Option<&str>) -> Self {
        Self {
            status: CellStatus::Assigned,
            subject: Some(subject.to_string()),
            teacher: teacher.map(str::to_string),
            room: room.map(str::to_string),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CellStatus::ToBeAssigned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SectionRow {
    pub section: SectionName,
    #[serde(flatten)]
    pub slots: BTreeMap<SlotLabel, Vec<Cell>>,
}

impl SectionRow {
    pub fn cell(&self, slot: &str) -> Option<&Cell> {
        self.slots.get(slot).and_then(|cells| cells.first())
    }

    pub fn cell_mut(&mut self, slot: &str) -> Option<&mut Cell> {
        self.slots.get_mut(slot).and_then(|cells| cells.first_mut())
    }
}

/// The timetable snapshot: day -> per-section rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Timetable(pub BTreeMap<DayName, Vec<SectionRow>>);

impl Timetable {
    pub fn row(&self, day: &str, section: &str) -> Option<&SectionRow> {
        self.0.get(day)?.iter().find(|row| row.section == section)
    }

    pub fn cell(&self, day: &str, section: &str, slot: &str) -> Option<&Cell> {
        self.row(day, section)?.cell(slot)
    }

    pub fn cell_mut(&mut self, day: &str, section: &str, slot: &str) -> Option<&mut Cell> {
        self.0
            .get_mut(day)?
            .iter_mut()
            .find(|row| row.section == section)?
            .cell_mut(slot)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolveRequest {
    pub config: DomainConfig,
    pub timetable: Timetable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    ModelInvalid,
    Unknown,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::ModelInvalid => "MODEL_INVALID",
            SolveStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Describes a soft constraint that was not met in the final timetable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmetSoftConstraint {
    pub constraint_type: String,
    pub description: String,
}

impl fmt::Display for UnmetSoftConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.constraint_type, self.description)
    }
}

/// The final output of the solver.
#[derive(Debug, Clone, Serialize)]
pub struct SolveResponse {
    pub status: SolveStatus,
    pub timetable: Timetable,
    pub gap_penalty: u32,
    pub unmet_soft_constraints: Vec<UnmetSoftConstraint>,
    pub unavailability_violations: Vec<UnavailabilityViolation>,
}
