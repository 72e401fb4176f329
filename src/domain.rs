use log::{trace, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use crate::data::{Blackout, DomainConfig, Strategy};
use crate::error::{Result, TimetableError};

pub type DayIdx = usize;
pub type SlotIdx = usize;
pub type SectionIdx = usize;
pub type TeacherIdx = usize;
pub type RoomIdx = usize;
pub type OfferingIdx = usize;

/// Who attends a class: the whole section, or one of its lab groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    All,
    Lab(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Theory,
    Lab,
}

impl Kind {
    pub fn span(self) -> usize {
        match self {
            Kind::Theory => 1,
            Kind::Lab => 2,
        }
    }
}

/// A subject offered to one section, with the teacher for each attending group.
#[derive(Debug, Clone)]
pub struct Offering {
    pub section: SectionIdx,
    pub name: String,
    pub kind: Kind,
    pub staff: Vec<(Group, TeacherIdx)>,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub home_room: RoomIdx,
    pub offerings: Vec<OfferingIdx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed {
    pub section: SectionIdx,
    pub offering: OfferingIdx,
    pub day: DayIdx,
    pub slot: SlotIdx,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub weekly_theory: usize,
    pub theory_per_day: usize,
    pub labs_per_group_per_day: usize,
}

/// A placeholder teacher ("TBD", empty) does not staff a class.
pub fn is_staffed(teacher: &str) -> bool {
    !teacher.trim().is_empty() && !teacher.contains("TBD")
}

/// Splits a compound cell value such as `"SK / SS"` used by parallel lab sessions.
pub fn split_compound(value: &str) -> impl Iterator<Item = &str> {
    value.split('/').map(str::trim).filter(|part| !part.is_empty())
}

/// Declared unavailability windows, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Unavailability {
    teachers: HashMap<String, HashSet<(String, String)>>,
    sections: HashMap<String, HashSet<(String, String)>>,
}

impl Unavailability {
    pub fn from_config(config: &DomainConfig) -> Self {
        fn flatten(windows: &BTreeMap<String, Blackout>) -> HashMap<String, HashSet<(String, String)>> {
            windows
                .iter()
                .map(|(who, days)| {
                    let cells = days
                        .iter()
                        .flat_map(|(day, slots)| slots.iter().map(move |slot| (day.clone(), slot.clone())))
                        .collect();
                    (who.clone(), cells)
                })
                .collect()
        }
        Self {
            teachers: flatten(&config.teacher_unavailability),
            sections: flatten(&config.section_unavailability),
        }
    }

    pub fn teacher_blocked(&self, teacher: &str, day: &str, slot: &str) -> bool {
        self.teachers
            .get(teacher)
            .is_some_and(|cells| cells.contains(&(day.to_string(), slot.to_string())))
    }

    pub fn section_blocked(&self, section: &str, day: &str, slot: &str) -> bool {
        self.sections
            .get(section)
            .is_some_and(|cells| cells.contains(&(day.to_string(), slot.to_string())))
    }

    /// Whether a class of `kind` for `section` taught by `teacher` may not use the cell.
    /// Section blackouts only apply to theory.
    pub fn forbids(&self, section: &str, teacher: &str, kind: Kind, day: &str, slot: &str) -> bool {
        self.teacher_blocked(teacher, day, slot)
            || (kind == Kind::Theory && self.section_blocked(section, day, slot))
    }
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub days: Vec<String>,
    pub slots: Vec<String>,
    pub groups: Vec<String>,
    pub sections: Vec<Section>,
    pub offerings: Vec<Offering>,
    pub teachers: Vec<String>,
    pub rooms: Vec<String>,
    pub lab_rooms: Vec<RoomIdx>,
    pub recess: Option<(SlotIdx, SlotIdx)>,
    pub fixed: Vec<Fixed>,
    /// Model B: sections to fill and their core offerings in configured order.
    pub core: Vec<(SectionIdx, Vec<OfferingIdx>)>,
    pub unavailability: Unavailability,
    pub limits: Limits,
    pub strategy: Strategy,
    pub time_budget: Duration,
    pub minimize_gaps: bool,
    lab_starts: Vec<bool>,
    teacher_ids: HashMap<String, TeacherIdx>,
    room_ids: HashMap<String, RoomIdx>,
}

fn input_error(message: String) -> TimetableError {
    TimetableError::Input(message)
}

fn index_of(names: &[String]) -> HashMap<String, usize> {
    names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect()
}

impl Domain {
    pub fn new(config: &DomainConfig) -> Result<Self> {
        let settings = &config.settings;
        if settings.days.is_empty() || settings.all_slots.is_empty() {
            return Err(input_error("settings must list at least one day and one slot".into()));
        }
        if settings.solver_timeout_seconds == 0 {
            return Err(input_error("solver_timeout_seconds must be positive".into()));
        }
        let days = settings.days.clone();
        let slots = settings.all_slots.clone();
        let day_ids = index_of(&days);
        let slot_ids = index_of(&slots);
        let section_ids = index_of(&config.sections);

        let slot_of = |label: &str| {
            slot_ids
                .get(label)
                .copied()
                .ok_or_else(|| input_error(format!("unknown slot '{label}'")))
        };
        let day_of = |name: &str| {
            day_ids
                .get(name)
                .copied()
                .ok_or_else(|| input_error(format!("unknown day '{name}'")))
        };

        let mut lab_starts = vec![false; slots.len()];
        for label in &settings.lab_slot_starts {
            lab_starts[slot_of(label)?] = true;
        }
        let recess = match settings.recess_slots.as_slice() {
            [] => None,
            [first, second] => Some((slot_of(first)?, slot_of(second)?)),
            other => {
                return Err(input_error(format!(
                    "recess_slots must name exactly two slots, got {}",
                    other.len()
                )));
            }
        };

        let mut teachers: Vec<String> = Vec::new();
        let mut teacher_ids: HashMap<String, TeacherIdx> = HashMap::new();
        let mut intern_teacher = |name: &str| -> TeacherIdx {
            *teacher_ids.entry(name.to_string()).or_insert_with(|| {
                teachers.push(name.to_string());
                teachers.len() - 1
            })
        };

        let mut rooms: Vec<String> = Vec::new();
        let mut room_ids: HashMap<String, RoomIdx> = HashMap::new();
        let mut intern_room = |name: &str| -> RoomIdx {
            *room_ids.entry(name.to_string()).or_insert_with(|| {
                rooms.push(name.to_string());
                rooms.len() - 1
            })
        };

        for key in config
            .subjects
            .keys()
            .chain(config.labs.keys())
            .chain(config.core_subjects.keys())
            .chain(config.section_theory_rooms.keys())
        {
            if !section_ids.contains_key(key) {
                return Err(input_error(format!("unknown section '{key}'")));
            }
        }

        let mut sections = Vec::with_capacity(config.sections.len());
        let mut offerings = Vec::new();
        for (section_idx, name) in config.sections.iter().enumerate() {
            let home = config
                .section_theory_rooms
                .get(name)
                .ok_or_else(|| input_error(format!("section '{name}' has no theory room")))?;
            let mut section = Section {
                name: name.clone(),
                home_room: intern_room(home),
                offerings: Vec::new(),
            };

            for (subject, teacher) in config.subjects.get(name).into_iter().flatten() {
                let staff = if is_staffed(teacher) {
                    vec![(Group::All, intern_teacher(teacher))]
                } else {
                    warn!("Subject {subject} of section {name} has no teacher; it will not be scheduled.");
                    Vec::new()
                };
                section.offerings.push(offerings.len());
                offerings.push(Offering {
                    section: section_idx,
                    name: subject.clone(),
                    kind: Kind::Theory,
                    staff,
                });
            }

            for lab in config.labs.get(name).into_iter().flatten() {
                let mut staff = Vec::new();
                for (group_idx, group) in config.groups.iter().enumerate() {
                    match lab.teachers.get(group) {
                        Some(teacher) if is_staffed(teacher) => {
                            staff.push((Group::Lab(group_idx), intern_teacher(teacher)));
                        }
                        _ => warn!("Lab {} of section {name} has no teacher for group {group}.", lab.name),
                    }
                }
                if let Some(unknown) = lab.teachers.keys().find(|g| !config.groups.contains(g)) {
                    return Err(input_error(format!(
                        "lab '{}' of section '{name}' names unknown group '{unknown}'",
                        lab.name
                    )));
                }
                section.offerings.push(offerings.len());
                offerings.push(Offering {
                    section: section_idx,
                    name: lab.name.clone(),
                    kind: Kind::Lab,
                    staff,
                });
            }
            sections.push(section);
        }
        let lab_rooms = config.lab_rooms.iter().map(|r| intern_room(r)).collect();

        let offering_named = |section: SectionIdx, subject: &str| {
            sections[section]
                .offerings
                .iter()
                .copied()
                .find(|&o| offerings[o].name == subject)
        };

        let mut fixed = Vec::with_capacity(config.fixed_assignments.len());
        for pin in &config.fixed_assignments {
            let section = *section_ids
                .get(&pin.section)
                .ok_or_else(|| input_error(format!("fixed assignment names unknown section '{}'", pin.section)))?;
            let offering = offering_named(section, &pin.subject).ok_or_else(|| {
                input_error(format!(
                    "fixed assignment names subject '{}' not offered to '{}'",
                    pin.subject, pin.section
                ))
            })?;
            fixed.push(Fixed {
                section,
                offering,
                day: day_of(&pin.day)?,
                slot: slot_of(&pin.slot)?,
            });
        }

        for windows in config
            .teacher_unavailability
            .values()
            .chain(config.section_unavailability.values())
        {
            for (day, labels) in windows {
                day_of(day)?;
                for label in labels {
                    slot_of(label)?;
                }
            }
        }

        let solve_set: Vec<String> = match &config.sections_to_solve {
            Some(names) => names.clone(),
            None => config
                .sections
                .iter()
                .filter(|s| config.core_subjects.contains_key(*s))
                .cloned()
                .collect(),
        };
        let mut core = Vec::with_capacity(solve_set.len());
        for name in &solve_set {
            let section = *section_ids
                .get(name)
                .ok_or_else(|| input_error(format!("sections_to_solve names unknown section '{name}'")))?;
            let subjects = config.core_subjects.get(name).map(Vec::as_slice).unwrap_or_default();
            let mut core_offerings = Vec::with_capacity(subjects.len());
            for subject in subjects {
                let offering = offering_named(section, subject)
                    .filter(|&o| offerings[o].kind == Kind::Theory && !offerings[o].staff.is_empty())
                    .ok_or_else(|| {
                        input_error(format!("core subject '{subject}' of '{name}' has no assigned teacher"))
                    })?;
                core_offerings.push(offering);
            }
            core.push((section, core_offerings));
        }
        if config.settings.strategy == Strategy::PartialFill && core.iter().all(|(_, subjects)| subjects.is_empty()) {
            return Err(input_error("partial fill needs core_subjects for at least one section".into()));
        }

        trace!(
            "Domain has {} sections, {} offerings, {} teachers and {} rooms.",
            sections.len(),
            offerings.len(),
            teachers.len(),
            rooms.len()
        );

        Ok(Self {
            days,
            slots,
            groups: config.groups.clone(),
            sections,
            offerings,
            teachers,
            rooms,
            lab_rooms,
            recess,
            fixed,
            core,
            unavailability: Unavailability::from_config(config),
            limits: Limits {
                weekly_theory: settings.weekly_theory_sessions,
                theory_per_day: settings.max_theory_per_day,
                labs_per_group_per_day: settings.max_labs_per_group_per_day,
            },
            strategy: settings.strategy,
            time_budget: Duration::from_secs(settings.solver_timeout_seconds),
            minimize_gaps: settings.minimize_gaps,
            lab_starts,
            teacher_ids,
            room_ids,
        })
    }

    /// A lab may start here: the slot is a designated start and has a following slot.
    pub fn is_lab_start(&self, slot: SlotIdx) -> bool {
        self.lab_starts[slot] && slot + 1 < self.slots.len()
    }

    pub fn teacher_id(&self, name: &str) -> Option<TeacherIdx> {
        self.teacher_ids.get(name).copied()
    }

    pub fn room_id(&self, name: &str) -> Option<RoomIdx> {
        self.room_ids.get(name).copied()
    }

    pub fn forbids(&self, section: SectionIdx, teacher: TeacherIdx, kind: Kind, day: DayIdx, slot: SlotIdx) -> bool {
        self.unavailability.forbids(
            &self.sections[section].name,
            &self.teachers[teacher],
            kind,
            &self.days[day],
            &self.slots[slot],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;
    use serde_json::json;

    #[test]
    fn resolves_offerings_and_staff() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        assert_eq!(domain.offerings.len(), 3);
        let lab = &domain.offerings[2];
        assert_eq!(lab.kind, Kind::Lab);
        assert_eq!(lab.staff.len(), 2);
        assert_eq!(lab.staff[0].0, Group::Lab(0));
        assert_eq!(domain.recess, Some((3, 4)));
        assert!(domain.is_lab_start(0));
        assert!(!domain.is_lab_start(1));
        assert_eq!(domain.lab_rooms.len(), 2);
    }

    #[test]
    fn lab_start_needs_a_following_slot() {
        let mut config = fixtures::full_config();
        config.settings.lab_slot_starts.push("4-5".into());
        let domain = Domain::new(&config).unwrap();
        assert!(!domain.is_lab_start(6));
    }

    #[test]
    fn unknown_slot_is_an_input_error() {
        let mut config = fixtures::full_config();
        config.settings.lab_slot_starts.push("1-2".into());
        assert!(matches!(Domain::new(&config), Err(TimetableError::Input(_))));
    }

    #[test]
    fn fixed_assignment_for_unoffered_subject_is_rejected() {
        let mut config = fixtures::full_config();
        config.fixed_assignments = serde_json::from_value(json!([
            { "section": "S1", "subject": "CHEM", "day": "Monday", "slot": "9-10" }
        ]))
        .unwrap();
        assert!(matches!(Domain::new(&config), Err(TimetableError::Input(_))));
    }

    #[test]
    fn placeholder_teachers_do_not_staff() {
        let mut config = fixtures::full_config();
        config.subjects.get_mut("S1").unwrap().push(("BIO".into(), "TBD".into()));
        let domain = Domain::new(&config).unwrap();
        let bio = domain.offerings.iter().find(|o| o.name == "BIO").unwrap();
        assert!(bio.staff.is_empty());
        assert!(domain.teacher_id("TBD").is_none());
    }

    #[test]
    fn section_blackout_exempts_labs() {
        let mut config = fixtures::full_config();
        config.section_unavailability =
            serde_json::from_value(json!({ "S1": { "Monday": ["9-10"] } })).unwrap();
        config.teacher_unavailability =
            serde_json::from_value(json!({ "T1": { "Friday": ["4-5"] } })).unwrap();
        let rules = Unavailability::from_config(&config);
        assert!(rules.forbids("S1", "T2", Kind::Theory, "Monday", "9-10"));
        assert!(!rules.forbids("S1", "T3", Kind::Lab, "Monday", "9-10"));
        assert!(rules.forbids("S1", "T1", Kind::Lab, "Friday", "4-5"));
        assert!(!rules.teacher_blocked("T1", "Friday", "3-4"));
    }

    #[test]
    fn compound_values_split_on_slash() {
        let parts: Vec<_> = split_compound("SK / SS").collect();
        assert_eq!(parts, ["SK", "SS"]);
        assert_eq!(split_compound("GF7").count(), 1);
        assert_eq!(split_compound(" / ").count(), 0);
    }
}
