use itertools::Itertools;
use log::{trace, warn};
use std::collections::BTreeMap;

use crate::catalog::{Candidate, Catalog, OpenSlots};
use crate::compiler::{DecodePlan, GapPenalty};
use crate::data::{Cell, CellStatus, Timetable, UnmetSoftConstraint};
use crate::domain::Domain;
use crate::engine::Assignment;

/// Separator between the values of groups meeting in parallel.
const COMPOUND_SEPARATOR: &str = " / ";

/// Returns a copy of `input` with the chosen classes in its open cells.
/// Pre-assigned cells are never touched.
pub fn decode(input: &Timetable, domain: &Domain, plan: &DecodePlan, assignment: &Assignment) -> Timetable {
    let mut timetable = input.clone();
    match plan {
        DecodePlan::Full { catalog, .. } => decode_full(&mut timetable, domain, catalog, assignment),
        DecodePlan::Partial { open } => decode_partial(&mut timetable, domain, open, assignment),
    }
    timetable
}

fn decode_full(timetable: &mut Timetable, domain: &Domain, catalog: &Catalog, assignment: &Assignment) {
    let mut cells: BTreeMap<_, Vec<&Candidate>> = BTreeMap::new();
    for (idx, candidate) in catalog.candidates().iter().enumerate() {
        if !assignment.is_set(idx) {
            continue;
        }
        for slot in candidate.footprint() {
            cells
                .entry((candidate.key.day, candidate.key.section, slot))
                .or_default()
                .push(candidate);
        }
    }
    trace!("Writing {} filled cells.", cells.len());

    for ((day, section, slot), mut sessions) in cells {
        sessions.sort_by_key(|c| c.key.group);
        let subject = sessions
            .iter()
            .map(|c| domain.offerings[c.key.subject].name.as_str())
            .dedup()
            .join(COMPOUND_SEPARATOR);
        let teacher = sessions
            .iter()
            .map(|c| domain.teachers[c.key.teacher].as_str())
            .join(COMPOUND_SEPARATOR);
        let room = sessions
            .iter()
            .map(|c| domain.rooms[c.key.room].as_str())
            .join(COMPOUND_SEPARATOR);
        fill(
            timetable,
            &domain.days[day],
            &domain.sections[section].name,
            &domain.slots[slot],
            Cell {
                status: CellStatus::Assigned,
                subject: Some(subject),
                teacher: Some(teacher),
                room: Some(room),
            },
        );
    }
}

fn decode_partial(timetable: &mut Timetable, domain: &Domain, open: &OpenSlots, assignment: &Assignment) {
    for (idx, slot) in open.slots().iter().enumerate() {
        let position = assignment.value(idx).round() as usize;
        let Some(core) = open.core(slot.section).get(position) else {
            warn!("Open slot {idx} resolved to unknown core position {position}.");
            continue;
        };
        let section = &domain.sections[slot.section];
        fill(
            timetable,
            &domain.days[slot.day],
            &section.name,
            &domain.slots[slot.slot],
            Cell::assigned(
                &domain.offerings[core.offering].name,
                Some(&domain.teachers[core.teacher]),
                Some(&domain.rooms[section.home_room]),
            ),
        );
    }
}

fn fill(timetable: &mut Timetable, day: &str, section: &str, slot: &str, cell: Cell) {
    match timetable.cell_mut(day, section, slot) {
        Some(target) if target.is_open() => *target = cell,
        Some(_) => warn!("Refusing to overwrite pre-assigned cell of {section} on {day} at {slot}."),
        None => warn!("No cell for {section} on {day} at {slot}."),
    }
}

/// Gap penalties that ended up paid, in section/day/slot order.
pub fn unmet_soft_constraints(domain: &Domain, plan: &DecodePlan, assignment: &Assignment) -> Vec<UnmetSoftConstraint> {
    let DecodePlan::Full { penalties, .. } = plan else {
        return Vec::new();
    };
    penalties
        .iter()
        .filter(|gap| assignment.is_set(gap.watch))
        .map(|&GapPenalty { section, day, slot, .. }| UnmetSoftConstraint {
            constraint_type: "Gap".to_string(),
            description: format!(
                "{} changes between busy and free on {} between {} and {}.",
                domain.sections[section].name,
                domain.days[day],
                domain.slots[slot],
                domain.slots[slot + 1]
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::data::fixtures::{self, busy_week, open_week, set};
    use crate::domain::{Group, Kind};
    use crate::snapshot::Snapshot;

    fn pick(catalog: &Catalog, subject: &str, domain: &Domain, day: usize, slot: usize) -> Vec<usize> {
        let mut rooms_used = Vec::new();
        catalog
            .candidates()
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                domain.offerings[c.key.subject].name == subject && c.key.day == day && c.key.slot == slot
            })
            .filter(|(_, c)| {
                // one room and one candidate per group
                let fresh = !rooms_used.iter().any(|&(g, r)| g == c.key.group || r == c.key.room);
                if fresh {
                    rooms_used.push((c.key.group, c.key.room));
                }
                fresh
            })
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn writes_parallel_labs_as_compound_cells() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let input = open_week(&["S1"]);
        let snapshot = Snapshot::new(&domain, &input).unwrap();
        let compiled = compiler::compile(&domain, &snapshot).unwrap();
        let DecodePlan::Full { catalog, .. } = &compiled.plan else {
            panic!("expected a full plan");
        };

        let mut values = vec![0.0; compiled.model.watched_count()];
        for idx in pick(catalog, "MATH", &domain, 0, 0).into_iter().chain(pick(catalog, "PHYS Lab", &domain, 1, 2)) {
            values[idx] = 1.0;
        }
        let assignment = Assignment::new(values);
        let output = decode(&input, &domain, &compiled.plan, &assignment);

        let math = output.cell("Monday", "S1", "9-10").unwrap();
        assert_eq!(math.subject.as_deref(), Some("MATH"));
        assert_eq!(math.teacher.as_deref(), Some("T1"));
        assert_eq!(math.room.as_deref(), Some("R1"));
        for slot in ["11-12", "12-1"] {
            let lab = output.cell("Tuesday", "S1", slot).unwrap();
            assert_eq!(lab.status, CellStatus::Assigned);
            assert_eq!(lab.subject.as_deref(), Some("PHYS Lab"));
            assert_eq!(lab.teacher.as_deref(), Some("T3 / T4"));
            assert_eq!(lab.room.as_deref(), Some("L1 / L2"));
        }
        assert!(output.cell("Tuesday", "S1", "2-3").unwrap().is_open());
        assert!(input.cell("Monday", "S1", "9-10").unwrap().is_open());
        assert!(catalog.candidates().iter().any(|c| c.kind == Kind::Lab && c.key.group == Group::Lab(1)));
    }

    #[test]
    fn decoding_twice_gives_the_same_timetable() {
        let config = fixtures::partial_config(&["S1"], &[("MATH", "T1")]);
        let domain = Domain::new(&config).unwrap();
        let mut input = busy_week(&["S1"]);
        for day in ["Monday", "Wednesday", "Friday"] {
            set(&mut input, day, "S1", "2-3", Cell::open());
        }
        let snapshot = Snapshot::new(&domain, &input).unwrap();
        let compiled = compiler::compile(&domain, &snapshot).unwrap();
        let assignment = Assignment::new(vec![0.0; 3]);

        let once = decode(&input, &domain, &compiled.plan, &assignment);
        let twice = decode(&input, &domain, &compiled.plan, &assignment);
        assert_eq!(once, twice);
        let cell = once.cell("Wednesday", "S1", "2-3").unwrap();
        assert_eq!(cell, &Cell::assigned("MATH", Some("T1"), Some("R1")));
        assert_eq!(once.cell("Monday", "S1", "9-10").unwrap().subject.as_deref(), Some("Library"));
    }

    #[test]
    fn reports_only_paid_gap_penalties() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let input = open_week(&["S1"]);
        let snapshot = Snapshot::new(&domain, &input).unwrap();
        let compiled = compiler::compile(&domain, &snapshot).unwrap();
        let DecodePlan::Full { penalties, .. } = &compiled.plan else {
            panic!("expected a full plan");
        };
        let mut values = vec![0.0; compiled.model.watched_count()];
        values[penalties[2].watch] = 1.0;
        let unmet = unmet_soft_constraints(&domain, &compiled.plan, &Assignment::new(values));
        assert_eq!(unmet.len(), 1);
        assert_eq!(unmet[0].constraint_type, "Gap");
        assert!(unmet[0].description.contains("between 11-12 and 12-1"));
    }
}
