mod full;
mod partial;

use crate::catalog::{Catalog, OpenSlots};
use crate::data::Strategy;
use crate::domain::{DayIdx, Domain, Fixed, SectionIdx, SlotIdx};
use crate::encoding::CompiledModel;
use crate::error::{Result, TimetableError};
use crate::snapshot::Snapshot;

/// A gap penalty between `slot` and `slot + 1` of a section's day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapPenalty {
    pub section: SectionIdx,
    pub day: DayIdx,
    pub slot: SlotIdx,
    pub watch: usize,
}

#[derive(Debug)]
pub enum DecodePlan {
    /// Candidate `i` of the catalog is watch index `i`.
    Full {
        catalog: Catalog,
        penalties: Vec<GapPenalty>,
    },
    /// Open slot `i` has its subject position at watch index `i`.
    Partial { open: OpenSlots },
}

pub struct Compiled {
    pub model: CompiledModel,
    pub plan: DecodePlan,
}

pub fn compile(domain: &Domain, snapshot: &Snapshot<'_>) -> Result<Compiled> {
    match domain.strategy {
        Strategy::Full => full::compile(domain, snapshot),
        Strategy::PartialFill => partial::compile(domain, snapshot),
    }
}

fn unmatched_pin(domain: &Domain, pin: &Fixed) -> TimetableError {
    TimetableError::UnmatchedFixedAssignment {
        section: domain.sections[pin.section].name.clone(),
        subject: domain.offerings[pin.offering].name.clone(),
        day: domain.days[pin.day].clone(),
        slot: domain.slots[pin.slot].clone(),
    }
}

fn unavailable_pin(domain: &Domain, pin: &Fixed) -> TimetableError {
    TimetableError::FixedConflictsWithUnavailability {
        section: domain.sections[pin.section].name.clone(),
        subject: domain.offerings[pin.offering].name.clone(),
        day: domain.days[pin.day].clone(),
        slot: domain.slots[pin.slot].clone(),
    }
}
