use serde::Serialize;
use std::fmt;

use crate::data::{CellStatus, Timetable};
use crate::domain::{split_compound, Unavailability};

/// A teacher scheduled during one of their unavailable slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailabilityViolation {
    pub teacher: String,
    pub section: String,
    pub day: String,
    pub slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl fmt::Display for UnavailabilityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is unavailable on {} at {} but teaches {} to {}",
            self.teacher,
            self.day,
            self.slot,
            self.subject.as_deref().unwrap_or("a class"),
            self.section
        )
    }
}

/// Lists every assigned cell whose teacher, or one of whose parallel teachers,
/// is declared unavailable at that cell.
pub fn check_unavailability(timetable: &Timetable, rules: &Unavailability) -> Vec<UnavailabilityViolation> {
    let mut violations = Vec::new();
    for (day, rows) in &timetable.0 {
        for row in rows {
            for (slot, cells) in &row.slots {
                for cell in cells.iter().filter(|c| c.status == CellStatus::Assigned) {
                    let Some(teachers) = &cell.teacher else {
                        continue;
                    };
                    for teacher in split_compound(teachers) {
                        if rules.teacher_blocked(teacher, day, slot) {
                            violations.push(UnavailabilityViolation {
                                teacher: teacher.to_string(),
                                section: row.section.clone(),
                                day: day.clone(),
                                slot: slot.clone(),
                                subject: cell.subject.clone(),
                            });
                        }
                    }
                }
            }
        }
    }
    violations
}
