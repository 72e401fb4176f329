use good_lp::{constraint, Expression, Variable};
use itertools::Itertools;
use log::{info, trace, warn};
use std::collections::{BTreeMap, HashSet};

use super::{unavailable_pin, unmatched_pin, Compiled, DecodePlan, GapPenalty};
use crate::catalog::Catalog;
use crate::domain::{split_compound, DayIdx, Domain, Group, Kind, OfferingIdx, SectionIdx, SlotIdx, TeacherIdx};
use crate::encoding::ModelBuilder;
use crate::error::{Result, TimetableError};
use crate::snapshot::Snapshot;

pub(super) fn compile(domain: &Domain, snapshot: &Snapshot<'_>) -> Result<Compiled> {
    let catalog = Catalog::build(domain, snapshot);
    info!(
        "Setting up ILP model with {} sections, {} offerings and {} candidate activities...",
        domain.sections.len(),
        domain.offerings.len(),
        catalog.len()
    );
    if catalog.is_empty() {
        warn!("No candidate activity survived pre-filtering; the timetable may already be full.");
    }

    let mut model = FullModel::new(domain, snapshot, &catalog);
    model.check_labs_synchronizable()?;
    model.fixed_assignments()?;
    model.resource_exclusivity();
    model.section_exclusivity();
    model.frequencies();
    model.parallel_labs();
    model.recess();
    model.daily_caps();
    model.teacher_once_per_section_day();
    model.unavailability();
    let penalties = model.gap_penalties();

    let objective: Expression = if domain.minimize_gaps {
        info!("Objective: minimise {} gap penalties.", penalties.len());
        penalties.iter().map(|(_, p)| *p).sum()
    } else {
        Expression::from(0.0)
    };
    let compiled = model.builder.finish(objective);
    trace!(
        "Full model has {} watched variables and {} constraints.",
        compiled.watched_count(),
        compiled.constraint_count()
    );
    Ok(Compiled {
        model: compiled,
        plan: DecodePlan::Full {
            catalog,
            penalties: penalties.into_iter().map(|(gap, _)| gap).collect(),
        },
    })
}

struct FullModel<'a> {
    domain: &'a Domain,
    snapshot: &'a Snapshot<'a>,
    catalog: &'a Catalog,
    builder: ModelBuilder,
    /// x[i] is 1 when candidate i is scheduled; watch index i.
    x: Vec<Variable>,
    presence: BTreeMap<(SectionIdx, DayIdx, SlotIdx), Variable>,
}

impl<'a> FullModel<'a> {
    fn new(domain: &'a Domain, snapshot: &'a Snapshot<'a>, catalog: &'a Catalog) -> Self {
        let mut builder = ModelBuilder::new();
        let x = builder.binaries(catalog.len());
        for &var in &x {
            builder.watch(var);
        }
        Self {
            domain,
            snapshot,
            catalog,
            builder,
            x,
            presence: BTreeMap::new(),
        }
    }

    fn sum(&self, idxs: &[usize]) -> Expression {
        idxs.iter().map(|&i| self.x[i]).sum()
    }

    fn at_most(&mut self, idxs: &[usize], limit: usize) {
        if idxs.len() > limit {
            let total = self.sum(idxs);
            self.builder.require(constraint!(total <= limit as f64));
        }
    }

    /// Occurrences an offering still needs per staffed group.
    fn remaining(&self, offering: OfferingIdx) -> usize {
        let o = &self.domain.offerings[offering];
        let pre = self.snapshot.occurrences(o.section, &o.name);
        match o.kind {
            Kind::Theory => self.domain.limits.weekly_theory.saturating_sub(pre),
            Kind::Lab => usize::from(pre == 0),
        }
    }

    fn sections_and_days(&self) -> Vec<(SectionIdx, DayIdx)> {
        (0..self.domain.sections.len())
            .cartesian_product(0..self.domain.days.len())
            .collect()
    }

    /// 1 when the section attends anything at (day, slot); `None` when nothing can be placed there.
    fn presence(&mut self, section: SectionIdx, day: DayIdx, slot: SlotIdx) -> Option<Variable> {
        if let Some(&var) = self.presence.get(&(section, day, slot)) {
            return Some(var);
        }
        let idxs = self.catalog.section_cell(self.domain, section, day, slot);
        if idxs.is_empty() {
            return None;
        }
        let total = self.sum(&idxs);
        let var = self.builder.indicator(total, idxs.len());
        self.presence.insert((section, day, slot), var);
        Some(var)
    }

    /// Every group of a parallel lab must have a usable candidate at one common start.
    fn check_labs_synchronizable(&self) -> Result<()> {
        let catalog = self.catalog;
        for (idx, offering) in self.domain.offerings.iter().enumerate() {
            if offering.kind != Kind::Lab || offering.staff.len() < 2 || self.remaining(idx) == 0 {
                continue;
            }
            let synchronizable = catalog.session_starts(idx).any(|(day, slot)| {
                offering.staff.iter().all(|&(group, _)| {
                    catalog
                        .session(idx, day, slot)
                        .iter()
                        .any(|&i| catalog.get(i).key.group == group && !catalog.get(i).forbidden)
                })
            });
            if !synchronizable {
                return Err(TimetableError::UnsynchronizableLab {
                    section: self.domain.sections[offering.section].name.clone(),
                    lab: offering.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn fixed_assignments(&mut self) -> Result<()> {
        info!("Adding 'fixed assignment' constraints...");
        let (domain, catalog) = (self.domain, self.catalog);
        for pin in &domain.fixed {
            let offering = &domain.offerings[pin.offering];
            if self.snapshot.assigned_subject(pin.section, pin.day, pin.slot) == Some(offering.name.as_str()) {
                trace!(
                    "Fixed {} for {} is already in the timetable.",
                    offering.name, domain.sections[pin.section].name
                );
                continue;
            }
            if offering.staff.is_empty() {
                return Err(unmatched_pin(domain, pin));
            }
            let session = catalog.session(pin.offering, pin.day, pin.slot);
            let mut rows = Vec::with_capacity(offering.staff.len());
            for &(group, _) in &offering.staff {
                let matching: Vec<usize> = session
                    .iter()
                    .copied()
                    .filter(|&i| catalog.get(i).key.group == group)
                    .collect();
                if matching.is_empty() {
                    return Err(unmatched_pin(domain, pin));
                }
                if matching.iter().all(|&i| catalog.get(i).forbidden) {
                    return Err(unavailable_pin(domain, pin));
                }
                rows.push(matching);
            }
            for matching in rows {
                let total = self.sum(&matching);
                self.builder.require(constraint!(total == 1));
            }
        }
        Ok(())
    }

    fn resource_exclusivity(&mut self) {
        info!("Adding 'no room overlap' constraints...");
        let catalog = self.catalog;
        for bucket in catalog.room_buckets() {
            self.at_most(bucket, 1);
        }
        info!("Adding 'no teacher overlap' constraints...");
        for bucket in catalog.teacher_buckets() {
            self.at_most(bucket, 1);
        }
    }

    /// A section's whole-class activities exclude everything else in the cell;
    /// different groups may run in parallel.
    fn section_exclusivity(&mut self) {
        info!("Adding 'no section overlap' constraints...");
        let catalog = self.catalog;
        let groups: Vec<Option<Group>> = if self.domain.groups.is_empty() {
            vec![None]
        } else {
            (0..self.domain.groups.len()).map(|g| Some(Group::Lab(g))).collect()
        };
        for (section, day) in self.sections_and_days() {
            for slot in 0..self.domain.slots.len() {
                let whole = catalog.cell(section, Group::All, day, slot);
                for group in &groups {
                    let mut bucket = whole.to_vec();
                    if let Some(group) = group {
                        bucket.extend_from_slice(catalog.cell(section, *group, day, slot));
                    }
                    self.at_most(&bucket, 1);
                }
            }
        }
    }

    fn frequencies(&mut self) {
        info!("Adding 'weekly frequency' constraints...");
        let (domain, catalog) = (self.domain, self.catalog);
        for (idx, offering) in domain.offerings.iter().enumerate() {
            let needed = self.remaining(idx);
            for &(group, _) in &offering.staff {
                let idxs = catalog.offering(idx, group);
                if idxs.is_empty() {
                    if needed > 0 {
                        warn!(
                            "{} of {} needs {needed} more occurrences but has nowhere to go.",
                            offering.name, domain.sections[offering.section].name
                        );
                        let nothing = Expression::from(0.0);
                        self.builder.require(constraint!(nothing == needed as f64));
                    }
                    continue;
                }
                let total = self.sum(idxs);
                self.builder.require(constraint!(total == needed as f64));
            }
        }
    }

    /// Groups of the same lab start together.
    fn parallel_labs(&mut self) {
        info!("Adding 'parallel lab' constraints...");
        let (domain, catalog) = (self.domain, self.catalog);
        for (idx, offering) in domain.offerings.iter().enumerate() {
            if offering.kind != Kind::Lab || offering.staff.len() < 2 {
                continue;
            }
            for (day, slot) in catalog.session_starts(idx).collect_vec() {
                let session = catalog.session(idx, day, slot);
                let mut starts = Vec::with_capacity(offering.staff.len());
                for &(group, _) in &offering.staff {
                    let matching: Vec<usize> = session
                        .iter()
                        .copied()
                        .filter(|&i| catalog.get(i).key.group == group)
                        .collect();
                    let total = self.sum(&matching);
                    starts.push(self.builder.indicator(total, matching.len()));
                }
                for (first, other) in starts.iter().tuple_windows() {
                    self.builder.require(constraint!(*first == *other));
                }
            }
        }
    }

    /// Offerings of the section held by pre-assigned cells on a day, one entry per cell.
    fn pre_assigned(&self, section: SectionIdx, day: DayIdx) -> Vec<OfferingIdx> {
        let domain = self.domain;
        let offerings = &domain.sections[section].offerings;
        (0..domain.slots.len())
            .filter_map(|slot| self.snapshot.assigned_subject(section, day, slot))
            .flat_map(split_compound)
            .filter_map(|name| offerings.iter().copied().find(|&o| domain.offerings[o].name == name))
            .collect()
    }

    fn pre_assigned_teachers(&self, section: SectionIdx, day: DayIdx) -> HashSet<TeacherIdx> {
        (0..self.domain.slots.len())
            .filter_map(|slot| self.snapshot.assigned_teacher(section, day, slot))
            .flat_map(split_compound)
            .filter_map(|teacher| self.domain.teacher_id(teacher))
            .collect()
    }

    // at most one of the two recess slots busy; `taken` counts slots the input already fills
    fn recess_rule(&mut self, busy: Vec<Variable>, taken: usize) {
        if busy.is_empty() || busy.len() + taken < 2 {
            return;
        }
        let total: Expression = busy.into_iter().sum();
        let limit = 1usize.saturating_sub(taken) as f64;
        self.builder.require(constraint!(total <= limit));
    }

    fn recess(&mut self) {
        let Some((a, b)) = self.domain.recess else {
            return;
        };
        info!("Adding 'recess' constraints...");
        let (catalog, snapshot) = (self.catalog, self.snapshot);
        for teacher in 0..self.domain.teachers.len() {
            for day in 0..self.domain.days.len() {
                let taken = [a, b].iter().filter(|&&slot| snapshot.teacher_busy(day, slot, teacher)).count();
                let sides = [a, b]
                    .iter()
                    .map(|&slot| catalog.teacher_at(day, slot, teacher))
                    .filter(|at| !at.is_empty())
                    .collect_vec();
                if sides.is_empty() || sides.len() + taken < 2 {
                    continue;
                }
                let mut busy = Vec::with_capacity(sides.len());
                for at in sides {
                    let total = self.sum(at);
                    busy.push(self.builder.indicator(total, at.len()));
                }
                self.recess_rule(busy, taken);
            }
        }
        for (section, day) in self.sections_and_days() {
            let taken = [a, b].iter().filter(|&&slot| !snapshot.is_open(section, day, slot)).count();
            let busy = [a, b]
                .into_iter()
                .filter_map(|slot| self.presence(section, day, slot))
                .collect_vec();
            self.recess_rule(busy, taken);
        }
    }

    fn daily_caps(&mut self) {
        info!("Adding 'daily cap' constraints...");
        let (domain, catalog) = (self.domain, self.catalog);
        let limits = domain.limits;
        for (section, day) in self.sections_and_days() {
            let held = self.pre_assigned(section, day);
            let todays = catalog.section_day(section, day);

            let theory = todays
                .iter()
                .copied()
                .filter(|&i| catalog.get(i).kind == Kind::Theory)
                .collect_vec();
            let theory_held = held.iter().filter(|&&o| domain.offerings[o].kind == Kind::Theory).count();
            self.at_most(&theory, limits.theory_per_day.saturating_sub(theory_held));

            for g in 0..domain.groups.len() {
                let group = Group::Lab(g);
                let labs = todays
                    .iter()
                    .copied()
                    .filter(|&i| catalog.get(i).kind == Kind::Lab && catalog.get(i).key.group == group)
                    .collect_vec();
                // a held lab fills two cells
                let lab_cells = held
                    .iter()
                    .filter(|&&o| {
                        let offering = &domain.offerings[o];
                        offering.kind == Kind::Lab && offering.staff.iter().any(|&(staffed, _)| staffed == group)
                    })
                    .count();
                self.at_most(&labs, limits.labs_per_group_per_day.saturating_sub(lab_cells.div_ceil(2)));
            }
        }
    }

    fn teacher_once_per_section_day(&mut self) {
        info!("Adding 'one class per teacher per section per day' constraints...");
        let catalog = self.catalog;
        for (section, day) in self.sections_and_days() {
            let taught = self.pre_assigned_teachers(section, day);
            let by_teacher = catalog
                .section_day(section, day)
                .iter()
                .map(|&i| (catalog.get(i).key.teacher, i))
                .into_group_map();
            for (teacher, idxs) in by_teacher.into_iter().sorted_by_key(|(teacher, _)| *teacher) {
                let limit = if taught.contains(&teacher) { 0 } else { 1 };
                self.at_most(&idxs, limit);
            }
        }
    }

    fn unavailability(&mut self) {
        let forbidden = self.catalog.candidates().iter().positions(|c| c.forbidden).collect_vec();
        if forbidden.is_empty() {
            return;
        }
        info!("Excluding {} candidates that meet an unavailability window...", forbidden.len());
        let total = self.sum(&forbidden);
        self.builder.require(constraint!(total == 0));
    }

    /// One penalty per pair of adjacent slots where the section goes from busy to free or back.
    fn gap_penalties(&mut self) -> Vec<(GapPenalty, Variable)> {
        let mut penalties = Vec::new();
        let pairs = self.domain.slots.len().saturating_sub(1);
        for (section, day) in self.sections_and_days() {
            for slot in 0..pairs {
                let (Some(here), Some(next)) = (self.presence(section, day, slot), self.presence(section, day, slot + 1))
                else {
                    continue;
                };
                let p = self.builder.abs_diff(here.into(), next.into());
                let watch = self.builder.watch(p);
                penalties.push((GapPenalty { section, day, slot, watch }, p));
            }
        }
        trace!("Created {} gap penalty variables.", penalties.len());
        penalties
    }
}
