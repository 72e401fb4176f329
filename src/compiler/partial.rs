use good_lp::{constraint, Expression};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use std::collections::HashSet;

use super::{unavailable_pin, unmatched_pin, Compiled, DecodePlan};
use crate::catalog::OpenSlots;
use crate::domain::{Domain, SectionIdx, TeacherIdx};
use crate::encoding::{count_equal, IntVar, ModelBuilder};
use crate::error::{Result, TimetableError};
use crate::snapshot::Snapshot;

pub(super) fn compile(domain: &Domain, snapshot: &Snapshot<'_>) -> Result<Compiled> {
    let open = OpenSlots::build(domain, snapshot)?;
    info!(
        "Setting up partial-fill model for {} sections with {} open slots...",
        open.sections().count(),
        open.len()
    );
    check_home_rooms(domain, snapshot, &open)?;

    let mut builder = ModelBuilder::new();
    let subjects: Vec<IntVar> = open.slots().iter().map(|slot| builder.int_var(&slot.domain)).collect();
    for var in &subjects {
        builder.watch(var.value);
    }
    let teachers: Vec<IntVar> = open
        .slots()
        .iter()
        .zip(&subjects)
        .map(|(slot, var)| {
            let table: Vec<TeacherIdx> = open.core(slot.section).iter().map(|c| c.teacher).collect();
            builder.element(var, &table)
        })
        .collect();

    let mut model = PartialModel {
        domain,
        snapshot,
        open: &open,
        builder,
        subjects,
        teachers,
    };
    model.fixed_assignments()?;
    model.frequencies();
    model.teacher_exclusivity();
    model.daily_uniqueness();
    model.teacher_recess();

    let compiled = model.builder.finish(Expression::from(0.0));
    trace!(
        "Partial model has {} watched variables and {} constraints.",
        compiled.watched_count(),
        compiled.constraint_count()
    );
    Ok(Compiled {
        model: compiled,
        plan: DecodePlan::Partial { open },
    })
}

/// Filled cells use their section's home room, so no two of them may meet in
/// one room and none may land in a room already committed at that time.
fn check_home_rooms(domain: &Domain, snapshot: &Snapshot<'_>, open: &OpenSlots) -> Result<()> {
    for day in 0..domain.days.len() {
        for slot in 0..domain.slots.len() {
            let mut seen: HashSet<usize> = snapshot.busy_rooms(day, slot).iter().copied().collect();
            for &idx in open.at(day, slot) {
                let room = domain.sections[open.slots()[idx].section].home_room;
                if !seen.insert(room) {
                    return Err(TimetableError::RoomClash {
                        room: domain.rooms[room].clone(),
                        day: domain.days[day].clone(),
                        slot: domain.slots[slot].clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

struct PartialModel<'a> {
    domain: &'a Domain,
    snapshot: &'a Snapshot<'a>,
    open: &'a OpenSlots,
    builder: ModelBuilder,
    /// Position in the section's core list, per open slot.
    subjects: Vec<IntVar>,
    /// Teacher of the chosen subject, per open slot.
    teachers: Vec<IntVar>,
}

impl PartialModel<'_> {
    fn fixed_assignments(&mut self) -> Result<()> {
        let (domain, open) = (self.domain, self.open);
        let solving: HashSet<SectionIdx> = open.sections().collect();
        for pin in &domain.fixed {
            let subject = domain.offerings[pin.offering].name.as_str();
            if self.snapshot.assigned_subject(pin.section, pin.day, pin.slot) == Some(subject) {
                debug!("Fixed {subject} for {} is already in place.", domain.sections[pin.section].name);
                continue;
            }
            // only the filled sections can move
            if !solving.contains(&pin.section) {
                return Err(unmatched_pin(domain, pin));
            }
            let (Some(idx), Some(position)) = (
                open.find(pin.section, pin.day, pin.slot),
                open.core(pin.section).iter().position(|c| c.offering == pin.offering),
            ) else {
                return Err(unmatched_pin(domain, pin));
            };
            match self.subjects[idx].literal(position) {
                Some(literal) => self.builder.require(constraint!(literal == 1)),
                None if open.core(pin.section)[position].remaining == 0 => {
                    return Err(unmatched_pin(domain, pin));
                }
                None => return Err(unavailable_pin(domain, pin)),
            }
        }
        Ok(())
    }

    /// Each core subject fills exactly the occurrences it still needs.
    fn frequencies(&mut self) {
        info!("Adding 'core subject frequency' constraints...");
        let (domain, open) = (self.domain, self.open);
        for section in open.sections() {
            let idxs: Vec<usize> = (0..domain.days.len())
                .flat_map(|day| open.section_day(section, day).iter().copied())
                .collect();
            let vars: Vec<&IntVar> = idxs.iter().map(|&i| &self.subjects[i]).collect();
            for (position, core) in open.core(section).iter().enumerate() {
                if core.remaining > 0 {
                    self.builder.exactly_k_equal(&vars, position, core.remaining);
                }
            }
        }
    }

    fn teacher_exclusivity(&mut self) {
        info!("Adding 'no teacher overlap' constraints...");
        let (domain, open) = (self.domain, self.open);
        for day in 0..domain.days.len() {
            for slot in 0..domain.slots.len() {
                let members = open.at(day, slot);
                if members.is_empty() {
                    continue;
                }
                let vars: Vec<&IntVar> = members.iter().map(|&i| &self.teachers[i]).collect();
                let clashes = self.builder.all_different(self.snapshot.busy_teachers(day, slot), &vars);
                for teacher in clashes {
                    warn!(
                        "Teacher {} is already double-booked on {} at {}.",
                        domain.teachers[teacher], domain.days[day], domain.slots[slot]
                    );
                }
            }
        }
    }

    /// A core subject appears at most once per day, and not at all on a day
    /// that already holds it.
    fn daily_uniqueness(&mut self) {
        info!("Adding 'daily subject uniqueness' constraints...");
        let (domain, open, snapshot) = (self.domain, self.open, self.snapshot);
        for section in open.sections() {
            for day in 0..domain.days.len() {
                let todays = open.section_day(section, day);
                if todays.is_empty() {
                    continue;
                }
                let already: HashSet<&str> = (0..domain.slots.len())
                    .filter_map(|slot| snapshot.assigned_subject(section, day, slot))
                    .collect();
                let vars: Vec<&IntVar> = todays.iter().map(|&i| &self.subjects[i]).collect();
                for (position, core) in open.core(section).iter().enumerate() {
                    let candidates = vars.iter().filter(|var| var.can_be(position)).count();
                    if already.contains(domain.offerings[core.offering].name.as_str()) {
                        if candidates > 0 {
                            self.builder.exactly_k_equal(&vars, position, 0);
                        }
                    } else if candidates > 1 {
                        self.builder.at_most_k_equal(&vars, position, 1);
                    }
                }
            }
        }
    }

    /// A teacher teaches in at most one of the two recess slots per day,
    /// counting classes already in the timetable.
    fn teacher_recess(&mut self) {
        let Some((a, b)) = self.domain.recess else {
            return;
        };
        info!("Adding 'teacher recess' constraints...");
        let (domain, open, snapshot) = (self.domain, self.open, self.snapshot);
        for day in 0..domain.days.len() {
            let at_a: Vec<&IntVar> = open.at(day, a).iter().map(|&i| &self.teachers[i]).collect();
            let at_b: Vec<&IntVar> = open.at(day, b).iter().map(|&i| &self.teachers[i]).collect();
            let teachers = at_a.iter().chain(&at_b).flat_map(|var| var.values()).unique().collect_vec();
            let mut rows = Vec::new();
            for teacher in teachers {
                let fixed = [a, b]
                    .iter()
                    .map(|&slot| snapshot.busy_teachers(day, slot).iter().filter(|&&t| t == teacher).count())
                    .sum::<usize>();
                if fixed > 1 {
                    warn!(
                        "Teacher {} already teaches both recess slots on {}.",
                        domain.teachers[teacher], domain.days[day]
                    );
                }
                let count = count_equal(at_a.iter().copied(), teacher) + count_equal(at_b.iter().copied(), teacher);
                rows.push((count, 1usize.saturating_sub(fixed)));
            }
            for (count, limit) in rows {
                self.builder.require(constraint!(count <= limit as f64));
            }
        }
    }
}
