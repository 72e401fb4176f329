use crate::data::{Cell, Timetable};
use crate::domain::{split_compound, DayIdx, Domain, RoomIdx, SectionIdx, SlotIdx, TeacherIdx};
use crate::error::{Result, TimetableError};

/// Open/assigned status of every configured cell plus the teachers and rooms
/// already committed by pre-assigned cells of any row.
#[derive(Debug)]
pub struct Snapshot<'a> {
    days: usize,
    slots: usize,
    cells: Vec<&'a Cell>,
    busy_teachers: Vec<Vec<TeacherIdx>>,
    busy_rooms: Vec<Vec<RoomIdx>>,
}

impl<'a> Snapshot<'a> {
    pub fn new(domain: &Domain, timetable: &'a Timetable) -> Result<Self> {
        let days = domain.days.len();
        let slots = domain.slots.len();
        let mut cells = Vec::with_capacity(domain.sections.len() * days * slots);
        for section in &domain.sections {
            for day in &domain.days {
                let row = timetable.row(day, &section.name).ok_or_else(|| {
                    TimetableError::Input(format!("timetable has no row for {} on {day}", section.name))
                })?;
                for slot in &domain.slots {
                    let cell = row.cell(slot).ok_or_else(|| {
                        TimetableError::Input(format!(
                            "timetable row for {} on {day} has no cell for {slot}",
                            section.name
                        ))
                    })?;
                    cells.push(cell);
                }
            }
        }

        let mut busy_teachers = vec![Vec::new(); days * slots];
        let mut busy_rooms = vec![Vec::new(); days * slots];
        for (day_idx, day) in domain.days.iter().enumerate() {
            for row in timetable.0.get(day).into_iter().flatten() {
                for (slot_idx, slot) in domain.slots.iter().enumerate() {
                    let Some(cell) = row.cell(slot).filter(|c| !c.is_open()) else {
                        continue;
                    };
                    let at = day_idx * slots + slot_idx;
                    if let Some(teacher) = &cell.teacher {
                        busy_teachers[at].extend(split_compound(teacher).filter_map(|t| domain.teacher_id(t)));
                    }
                    if let Some(room) = &cell.room {
                        busy_rooms[at].extend(split_compound(room).filter_map(|r| domain.room_id(r)));
                    }
                }
            }
        }

        Ok(Self {
            days,
            slots,
            cells,
            busy_teachers,
            busy_rooms,
        })
    }

    fn cell(&self, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> &'a Cell {
        self.cells[(section * self.days + day) * self.slots + slot]
    }

    pub fn is_open(&self, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> bool {
        self.cell(section, day, slot).is_open()
    }

    pub fn assigned_subject(&self, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> Option<&'a str> {
        let cell = self.cell(section, day, slot);
        if cell.is_open() {
            return None;
        }
        cell.subject.as_deref()
    }

    pub fn assigned_teacher(&self, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> Option<&'a str> {
        let cell = self.cell(section, day, slot);
        if cell.is_open() {
            return None;
        }
        cell.teacher.as_deref()
    }

    /// How many pre-assigned cells of the section's week carry `subject`.
    pub fn occurrences(&self, section: SectionIdx, subject: &str) -> usize {
        (0..self.days)
            .flat_map(|day| (0..self.slots).map(move |slot| (day, slot)))
            .filter(|&(day, slot)| self.assigned_subject(section, day, slot) == Some(subject))
            .count()
    }

    /// Teachers committed at (day, slot); repeated when the input itself double-books.
    pub fn busy_teachers(&self, day: DayIdx, slot: SlotIdx) -> &[TeacherIdx] {
        &self.busy_teachers[day * self.slots + slot]
    }

    pub fn busy_rooms(&self, day: DayIdx, slot: SlotIdx) -> &[RoomIdx] {
        &self.busy_rooms[day * self.slots + slot]
    }

    pub fn teacher_busy(&self, day: DayIdx, slot: SlotIdx, teacher: TeacherIdx) -> bool {
        self.busy_teachers(day, slot).contains(&teacher)
    }

    pub fn room_busy(&self, day: DayIdx, slot: SlotIdx, room: RoomIdx) -> bool {
        self.busy_rooms(day, slot).contains(&room)
    }

    pub fn open_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_open()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{self, busy_week, open_week, set};

    #[test]
    fn missing_row_is_an_input_error() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let mut timetable = open_week(&["S1"]);
        timetable.0.get_mut("Wednesday").unwrap().clear();
        let err = Snapshot::new(&domain, &timetable).unwrap_err();
        assert!(matches!(err, TimetableError::Input(message) if message.contains("Wednesday")));
    }

    #[test]
    fn compound_cells_commit_every_teacher_and_room() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let mut timetable = busy_week(&["S1"]);
        set(
            &mut timetable,
            "Tuesday",
            "S1",
            "11-12",
            Cell::assigned("PHYS Lab", Some("T3 / T4"), Some("L1 / L2")),
        );
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        let t3 = domain.teacher_id("T3").unwrap();
        let t4 = domain.teacher_id("T4").unwrap();
        let l2 = domain.room_id("L2").unwrap();
        assert!(snapshot.teacher_busy(1, 2, t3));
        assert!(snapshot.teacher_busy(1, 2, t4));
        assert!(snapshot.room_busy(1, 2, l2));
        assert!(!snapshot.teacher_busy(1, 3, t3));
        assert_eq!(snapshot.open_count(), 0);
    }

    #[test]
    fn counts_pre_assigned_occurrences() {
        let domain = Domain::new(&fixtures::full_config()).unwrap();
        let mut timetable = open_week(&["S1"]);
        set(&mut timetable, "Monday", "S1", "9-10", Cell::assigned("MATH", Some("T1"), Some("R1")));
        set(&mut timetable, "Friday", "S1", "2-3", Cell::assigned("MATH", Some("T1"), Some("R1")));
        let snapshot = Snapshot::new(&domain, &timetable).unwrap();
        assert_eq!(snapshot.occurrences(0, "MATH"), 2);
        assert_eq!(snapshot.occurrences(0, "PHYS"), 0);
        assert!(!snapshot.is_open(0, 0, 0));
        assert_eq!(snapshot.assigned_subject(0, 4, 4), Some("MATH"));
        assert_eq!(snapshot.assigned_teacher(0, 4, 4), Some("T1"));
        assert_eq!(snapshot.assigned_teacher(0, 4, 3), None);
    }
}
