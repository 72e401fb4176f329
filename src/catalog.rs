use itertools::Itertools;
use log::{trace, warn};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::domain::{
    DayIdx, Domain, Group, Kind, OfferingIdx, RoomIdx, SectionIdx, SlotIdx, TeacherIdx,
};
use crate::error::{Result, TimetableError};
use crate::snapshot::Snapshot;

/// Identity of one hypothesised class occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKey {
    pub section: SectionIdx,
    pub group: Group,
    pub subject: OfferingIdx,
    pub teacher: TeacherIdx,
    pub day: DayIdx,
    pub slot: SlotIdx,
    pub room: RoomIdx,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: ActivityKey,
    pub kind: Kind,
    pub forbidden: bool,
}

impl Candidate {
    pub fn footprint(&self) -> Range<SlotIdx> {
        self.key.slot..self.key.slot + self.kind.span()
    }
}

/// Candidates of the full encoding with the indices the compiler needs.
///
#[derive(Debug, Default)]
pub struct Catalog {
    candidates: Vec<Candidate>,
    by_room: BTreeMap<(DayIdx, SlotIdx, RoomIdx), Vec<usize>>,
    by_teacher: BTreeMap<(DayIdx, SlotIdx, TeacherIdx), Vec<usize>>,
    by_cell: BTreeMap<(SectionIdx, Group, DayIdx, SlotIdx), Vec<usize>>,
    by_offering: BTreeMap<(OfferingIdx, Group), Vec<usize>>,
    by_session: BTreeMap<(OfferingIdx, DayIdx, SlotIdx), Vec<usize>>,
    by_section_day: BTreeMap<(SectionIdx, DayIdx), Vec<usize>>,
}

impl Catalog {
    pub fn build(domain: &Domain, snapshot: &Snapshot<'_>) -> Self {
        let mut catalog = Catalog::default();
        let slot_count = domain.slots.len();

        for (section_idx, section) in domain.sections.iter().enumerate() {
            for &offering_idx in &section.offerings {
                let offering = &domain.offerings[offering_idx];
                let rooms: &[RoomIdx] = match offering.kind {
                    Kind::Theory => std::slice::from_ref(&section.home_room),
                    Kind::Lab => &domain.lab_rooms,
                };
                for &(group, teacher) in &offering.staff {
                    for day in 0..domain.days.len() {
                        for slot in 0..slot_count {
                            if offering.kind == Kind::Lab && !domain.is_lab_start(slot) {
                                continue;
                            }
                            let footprint = slot..slot + offering.kind.span();
                            if footprint.end > slot_count
                                || !footprint.clone().all(|s| snapshot.is_open(section_idx, day, s))
                                || footprint.clone().any(|s| snapshot.teacher_busy(day, s, teacher))
                            {
                                continue;
                            }
                            let forbidden = footprint
                                .clone()
                                .any(|s| domain.forbids(section_idx, teacher, offering.kind, day, s));
                            for &room in rooms {
                                if footprint.clone().any(|s| snapshot.room_busy(day, s, room)) {
                                    continue;
                                }
                                catalog.push(Candidate {
                                    key: ActivityKey {
                                        section: section_idx,
                                        group,
                                        subject: offering_idx,
                                        teacher,
                                        day,
                                        slot,
                                        room,
                                    },
                                    kind: offering.kind,
                                    forbidden,
                                });
                            }
                        }
                    }
                }
            }
        }

        trace!(
            "Generated {} candidate activities ({} forbidden by unavailability).",
            catalog.candidates.len(),
            catalog.candidates.iter().filter(|c| c.forbidden).count()
        );
        catalog
    }

    fn push(&mut self, candidate: Candidate) {
        let idx = self.candidates.len();
        let key = candidate.key;
        for slot in candidate.footprint() {
            self.by_room.entry((key.day, slot, key.room)).or_default().push(idx);
            self.by_teacher.entry((key.day, slot, key.teacher)).or_default().push(idx);
            self.by_cell.entry((key.section, key.group, key.day, slot)).or_default().push(idx);
        }
        self.by_offering.entry((key.subject, key.group)).or_default().push(idx);
        self.by_session.entry((key.subject, key.day, key.slot)).or_default().push(idx);
        self.by_section_day.entry((key.section, key.day)).or_default().push(idx);
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn get(&self, idx: usize) -> &Candidate {
        &self.candidates[idx]
    }

    pub fn room_buckets(&self) -> impl Iterator<Item = &[usize]> {
        self.by_room.values().map(Vec::as_slice)
    }

    pub fn teacher_buckets(&self) -> impl Iterator<Item = &[usize]> {
        self.by_teacher.values().map(Vec::as_slice)
    }

    pub fn teacher_at(&self, day: DayIdx, slot: SlotIdx, teacher: TeacherIdx) -> &[usize] {
        self.by_teacher.get(&(day, slot, teacher)).map_or(&[], Vec::as_slice)
    }

    pub fn cell(&self, section: SectionIdx, group: Group, day: DayIdx, slot: SlotIdx) -> &[usize] {
        self.by_cell.get(&(section, group, day, slot)).map_or(&[], Vec::as_slice)
    }

    // everything the section could attend there, whatever the group
    pub fn section_cell(&self, domain: &Domain, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> Vec<usize> {
        std::iter::once(Group::All)
            .chain((0..domain.groups.len()).map(Group::Lab))
            .flat_map(|group| self.cell(section, group, day, slot).iter().copied())
            .collect()
    }

    pub fn offering(&self, offering: OfferingIdx, group: Group) -> &[usize] {
        self.by_offering.get(&(offering, group)).map_or(&[], Vec::as_slice)
    }

    pub fn session(&self, offering: OfferingIdx, day: DayIdx, slot: SlotIdx) -> &[usize] {
        self.by_session.get(&(offering, day, slot)).map_or(&[], Vec::as_slice)
    }

    pub fn session_starts(&self, offering: OfferingIdx) -> impl Iterator<Item = (DayIdx, SlotIdx)> + '_ {
        self.by_session
            .range((offering, 0, 0)..(offering + 1, 0, 0))
            .map(|(&(_, day, slot), _)| (day, slot))
    }

    pub fn section_day(&self, section: SectionIdx, day: DayIdx) -> &[usize] {
        self.by_section_day.get(&(section, day)).map_or(&[], Vec::as_slice)
    }
}

/// A core subject still owed to a section by the partial fill.
#[derive(Debug, Clone)]
pub struct CoreSubject {
    pub offering: OfferingIdx,
    pub teacher: TeacherIdx,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct OpenSlot {
    pub section: SectionIdx,
    pub day: DayIdx,
    pub slot: SlotIdx,
    /// Positions in the section's core list the cell may take.
    pub domain: Vec<usize>,
}

/// Open cells of the sections being filled, with their core subjects.
#[derive(Debug, Default)]
pub struct OpenSlots {
    core: BTreeMap<SectionIdx, Vec<CoreSubject>>,
    slots: Vec<OpenSlot>,
    by_time: BTreeMap<(DayIdx, SlotIdx), Vec<usize>>,
    by_section_day: BTreeMap<(SectionIdx, DayIdx), Vec<usize>>,
}

impl OpenSlots {
    /// Collects open cells and rejects sections whose open-cell count differs
    /// from the occurrences their core subjects still need.
    pub fn build(domain: &Domain, snapshot: &Snapshot<'_>) -> Result<Self> {
        let mut open = OpenSlots::default();
        for (section, offerings) in &domain.core {
            let section = *section;
            let name = &domain.sections[section].name;
            let core: Vec<CoreSubject> = offerings
                .iter()
                .map(|&offering| {
                    let subject = &domain.offerings[offering];
                    let pre = snapshot.occurrences(section, &subject.name);
                    CoreSubject {
                        offering,
                        teacher: subject.staff[0].1,
                        remaining: domain.limits.weekly_theory.saturating_sub(pre),
                    }
                })
                .collect();

            let mut cells = Vec::new();
            for day in 0..domain.days.len() {
                for slot in 0..domain.slots.len() {
                    if !snapshot.is_open(section, day, slot) {
                        continue;
                    }
                    if domain.unavailability.section_blocked(name, &domain.days[day], &domain.slots[slot]) {
                        warn!(
                            "Open cell of {name} on {} at {} is blacked out and stays unassigned.",
                            domain.days[day], domain.slots[slot]
                        );
                        continue;
                    }
                    cells.push((day, slot));
                }
            }

            let expected: usize = core.iter().map(|c| c.remaining).sum();
            if cells.len() != expected {
                return Err(TimetableError::FeasibilityMismatch {
                    section: name.clone(),
                    expected,
                    actual: cells.len(),
                });
            }

            for (day, slot) in cells {
                let values = core
                    .iter()
                    .positions(|c| {
                        c.remaining > 0
                            && !domain.forbids(section, c.teacher, Kind::Theory, day, slot)
                    })
                    .collect_vec();
                if values.is_empty() {
                    warn!(
                        "No core subject of {name} can be taught on {} at {}.",
                        domain.days[day], domain.slots[slot]
                    );
                }
                let idx = open.slots.len();
                open.by_time.entry((day, slot)).or_default().push(idx);
                open.by_section_day.entry((section, day)).or_default().push(idx);
                open.slots.push(OpenSlot {
                    section,
                    day,
                    slot,
                    domain: values,
                });
            }
            open.core.insert(section, core);
        }
        trace!("Collected {} open slots to fill.", open.slots.len());
        Ok(open)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[OpenSlot] {
        &self.slots
    }

    pub fn core(&self, section: SectionIdx) -> &[CoreSubject] {
        self.core.get(&section).map_or(&[], Vec::as_slice)
    }

    pub fn sections(&self) -> impl Iterator<Item = SectionIdx> + '_ {
        self.core.keys().copied()
    }

    pub fn at(&self, day: DayIdx, slot: SlotIdx) -> &[usize] {
        self.by_time.get(&(day, slot)).map_or(&[], Vec::as_slice)
    }

    pub fn section_day(&self, section: SectionIdx, day: DayIdx) -> &[usize] {
        self.by_section_day.get(&(section, day)).map_or(&[], Vec::as_slice)
    }

    pub fn find(&self, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> Option<usize> {
        self.section_day(section, day)
            .iter()
            .copied()
            .find(|&idx| self.slots[idx].slot == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{self, busy_week, open_week, set};
    use crate::data::Cell;
    use serde_json::json;

    #[test]
    fn enumerates_theory_everywhere_and_labs_at_lab_starts() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let timetable = open_week(&["S1"]);
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let catalog = Catalog::build(&domain, &snapshot);

        // two theory subjects x 5 days x 7 slots x home room
        let theory = catalog.candidates().iter().filter(|c| c.kind == Kind::Theory).count();
        assert_eq!(theory, 2 * 5 * 7);
        // one lab x 2 groups x 5 days x 3 starts x 2 rooms
        let labs = catalog.candidates().iter().filter(|c| c.kind == Kind::Lab).count();
        assert_eq!(labs, 2 * 5 * 3 * 2);
        assert!(catalog.candidates().iter().all(|c| !c.forbidden));
        assert!(catalog
            .candidates()
            .iter()
            .filter(|c| c.kind == Kind::Lab)
            .all(|c| matches!(c.key.group, Group::Lab(_)) && [0, 2, 5].contains(&c.key.slot)));
    }

    #[test]
    fn lab_footprint_is_indexed_on_both_slots() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let timetable = open_week(&["S1"]);
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let catalog = Catalog::build(&domain, &snapshot);
        let t3 = domain.teacher_id("T3").unwrap();

        let first = catalog.teacher_at(0, 0, t3);
        let second = catalog.teacher_at(0, 1, t3);
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        // slot 2 ("11-12") is covered only by labs starting there
        assert!(catalog.teacher_at(0, 2, t3).iter().all(|&i| catalog.get(i).key.slot == 2));
    }

    #[test]
    fn occupied_cells_and_committed_resources_are_pruned() {
        let mut config = fixtures::full_config();
        config.sections.push("S2".into());
        config.section_theory_rooms.insert("S2".into(), "R2".into());
        let domain = Domain::new(&config).unwrap();
        let mut timetable = open_week(&["S1"]);
        timetable.0.values_mut().for_each(|rows| rows.extend(busy_week(&["S2"]).0["Monday"].clone()));
        set(&mut timetable, "Monday", "S1", "10-11", Cell::assigned("Seminar", None, None));
        set(&mut timetable, "Tuesday", "S2", "9-10", Cell::assigned("CHEM", Some("T1"), Some("R2")));
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let catalog = Catalog::build(&domain, &snapshot);

        // the lab starting at 9-10 on Monday would cover the occupied 10-11
        assert!(catalog.session(2, 0, 0).is_empty());
        assert!(!catalog.session(2, 0, 2).is_empty());
        // T1 is committed elsewhere on Tuesday 9-10
        let t1 = domain.teacher_id("T1").unwrap();
        assert!(catalog.teacher_at(1, 0, t1).is_empty());
        assert_eq!(catalog.teacher_at(1, 1, t1).len(), 1);
    }

    #[test]
    fn unavailable_candidates_are_kept_but_flagged() {
        let mut config = fixtures::full_config();
        config.teacher_unavailability =
            serde_json::from_value(json!({ "T3": { "Monday": ["10-11"] } })).unwrap();
        let domain = Domain::new(&config).unwrap();
        let timetable = open_week(&["S1"]);
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let catalog = Catalog::build(&domain, &snapshot);

        let t3 = domain.teacher_id("T3").unwrap();
        let monday_first = catalog.teacher_at(0, 0, t3);
        assert_eq!(monday_first.len(), 2);
        assert!(monday_first.iter().all(|&i| catalog.get(i).forbidden));
        assert!(catalog.teacher_at(1, 0, t3).iter().all(|&i| !catalog.get(i).forbidden));
    }

    #[test]
    fn open_slot_count_must_match_quota() {
        let config = fixtures::partial_config(&["S1"], &[("MATH", "T1")]);
        let domain = Domain::new(&config).unwrap();
        let mut timetable = busy_week(&["S1"]);
        for day in ["Monday", "Tuesday", "Wednesday", "Thursday"] {
            set(&mut timetable, day, "S1", "9-10", Cell::open());
        }
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let err = OpenSlots::build(&domain, &snapshot).unwrap_err();
        assert_eq!(
            err,
            TimetableError::FeasibilityMismatch {
                section: "S1".into(),
                expected: 3,
                actual: 4,
            }
        );
    }

    #[test]
    fn pre_assigned_occurrences_reduce_the_quota() {
        let config = fixtures::partial_config(&["S1"], &[("MATH", "T1"), ("PHYS", "T2")]);
        let domain = Domain::new(&config).unwrap();
        let mut timetable = busy_week(&["S1"]);
        set(&mut timetable, "Friday", "S1", "9-10", Cell::assigned("MATH", Some("T1"), Some("R1")));
        for (day, slot) in [("Monday", "9-10"), ("Tuesday", "9-10"), ("Monday", "10-11"), ("Tuesday", "10-11"), ("Wednesday", "10-11")] {
            set(&mut timetable, day, "S1", slot, Cell::open());
        }
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let open = OpenSlots::build(&domain, &snapshot).unwrap();
        assert_eq!(open.len(), 5);
        assert_eq!(open.core(0)[0].remaining, 2);
        assert_eq!(open.core(0)[1].remaining, 3);
        assert_eq!(open.find(0, 1, 1), Some(3));
    }

    #[test]
    fn unavailable_teachers_leave_the_domain() {
        let mut config = fixtures::partial_config(&["S1"], &[("MATH", "T1"), ("PHYS", "T2")]);
        config.teacher_unavailability =
            serde_json::from_value(json!({ "T2": { "Monday": ["9-10"] } })).unwrap();
        let domain = Domain::new(&config).unwrap();
        let mut timetable = busy_week(&["S1"]);
        for day in ["Monday", "Tuesday", "Wednesday"] {
            set(&mut timetable, day, "S1", "9-10", Cell::open());
            set(&mut timetable, day, "S1", "10-11", Cell::open());
        }
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let open = OpenSlots::build(&domain, &snapshot).unwrap();
        let monday_first = &open.slots()[open.find(0, 0, 0).unwrap()];
        assert_eq!(monday_first.domain, vec![0]);
        let monday_second = &open.slots()[open.find(0, 0, 1).unwrap()];
        assert_eq!(monday_second.domain, vec![0, 1]);
    }
}
