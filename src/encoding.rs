//! Linear encodings of the logical building blocks the compiler needs.

use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, Variable,
};
use std::collections::BTreeMap;

pub struct CompiledModel {
    pub(crate) problem: ProblemVariables,
    pub(crate) objective: Expression,
    pub(crate) constraints: Vec<Constraint>,
    /// Variables whose values the engine reports back, by watch index.
    pub(crate) watched: Vec<Variable>,
}

impl CompiledModel {
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

/// An integer decision over a finite set of values, encoded one-hot.
///
/// `terms` pairs each value with a 0/1 literal that is 1 exactly when the
/// variable takes that value. A derived variable (see [`ModelBuilder::element`])
/// may list the same value for several literals.
#[derive(Debug, Clone)]
pub struct IntVar {
    pub value: Variable,
    terms: Vec<(usize, Variable)>,
}

impl IntVar {
    /// Expression that is 1 when the variable equals `value`, else 0.
    pub fn equals(&self, value: usize) -> Expression {
        self.terms
            .iter()
            .filter(|(v, _)| *v == value)
            .map(|(_, literal)| *literal)
            .sum()
    }

    pub fn can_be(&self, value: usize) -> bool {
        self.terms.iter().any(|(v, _)| *v == value)
    }

    pub fn literal(&self, value: usize) -> Option<Variable> {
        self.terms.iter().find(|(v, _)| *v == value).map(|(_, literal)| *literal)
    }

    pub fn values(&self) -> impl Iterator<Item = usize> + '_ {
        self.terms.iter().map(|(v, _)| *v)
    }
}

pub fn count_equal<'a>(vars: impl IntoIterator<Item = &'a IntVar>, value: usize) -> Expression {
    vars.into_iter().map(|var| var.equals(value)).sum()
}

pub struct ModelBuilder {
    problem: ProblemVariables,
    constraints: Vec<Constraint>,
    watched: Vec<Variable>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            problem: ProblemVariables::new(),
            constraints: Vec::new(),
            watched: Vec::new(),
        }
    }

    pub fn binaries(&mut self, n: usize) -> Vec<Variable> {
        self.problem.add_vector(variable().binary(), n)
    }

    pub fn binary(&mut self) -> Variable {
        self.problem.add(variable().binary())
    }

    /// Registers a variable whose value must be reported back; returns its watch index.
    pub fn watch(&mut self, var: Variable) -> usize {
        self.watched.push(var);
        self.watched.len() - 1
    }

    pub fn require(&mut self, c: Constraint) {
        self.constraints.push(c);
    }

    /// 0/1 variable equal to `sum > 0`, for a sum of `terms` 0/1 variables.
    pub fn indicator(&mut self, sum: Expression, terms: usize) -> Variable {
        let b = self.binary();
        self.require(constraint!(b <= sum.clone()));
        self.require(constraint!(sum <= (terms.max(1) as f64) * b));
        b
    }

    /// 0/1 variable equal to `|a - b|` for 0/1 expressions `a` and `b`.
    pub fn abs_diff(&mut self, a: Expression, b: Expression) -> Variable {
        let p = self.binary();
        self.require(constraint!(a.clone() - b.clone() <= p));
        self.require(constraint!(b.clone() - a.clone() <= p));
        self.require(constraint!(p <= a.clone() + b.clone()));
        self.require(constraint!(a + b + p <= 2));
        p
    }

    pub fn int_var(&mut self, values: &[usize]) -> IntVar {
        let lo = values.iter().min().copied().unwrap_or(0) as f64;
        let hi = values.iter().max().copied().unwrap_or(0) as f64;
        let value = self.problem.add(variable().integer().min(lo).max(hi));
        let literals = self.binaries(values.len());
        let one: Expression = literals.iter().copied().sum();
        self.require(constraint!(one == 1));
        let weighted: Expression = values
            .iter()
            .zip(&literals)
            .map(|(&v, &literal)| (v as f64) * literal)
            .sum();
        self.require(constraint!(value == weighted));
        IntVar {
            value,
            terms: values.iter().copied().zip(literals).collect(),
        }
    }

    /// Derived variable `table[index]`.
    pub fn element(&mut self, index: &IntVar, table: &[usize]) -> IntVar {
        let terms: Vec<(usize, Variable)> = index
            .terms
            .iter()
            .map(|&(position, literal)| (table[position], literal))
            .collect();
        let lo = terms.iter().map(|(v, _)| *v).min().unwrap_or(0) as f64;
        let hi = terms.iter().map(|(v, _)| *v).max().unwrap_or(0) as f64;
        let value = self.problem.add(variable().integer().min(lo).max(hi));
        let weighted: Expression = terms.iter().map(|&(v, literal)| (v as f64) * literal).sum();
        self.require(constraint!(value == weighted));
        IntVar { value, terms }
    }

    pub fn exactly_k_equal(&mut self, vars: &[&IntVar], value: usize, k: usize) {
        let count = count_equal(vars.iter().copied(), value);
        self.require(constraint!(count == k as f64));
    }

    pub fn at_most_k_equal(&mut self, vars: &[&IntVar], value: usize, k: usize) {
        let count = count_equal(vars.iter().copied(), value);
        self.require(constraint!(count <= k as f64));
    }

    /// `constants` and `vars` take pairwise distinct values.
    ///
    /// Values repeated among the constants alone cannot be repaired by any
    /// decision; they are returned for the caller to report and only keep the
    /// variables away from them.
    pub fn all_different(&mut self, constants: &[usize], vars: &[&IntVar]) -> Vec<usize> {
        let mut fixed: BTreeMap<usize, usize> = BTreeMap::new();
        for &c in constants {
            *fixed.entry(c).or_default() += 1;
        }
        let clashes: Vec<usize> = fixed.iter().filter(|(_, n)| **n > 1).map(|(v, _)| *v).collect();

        let mut values: Vec<usize> = vars.iter().flat_map(|var| var.values()).collect();
        values.sort_unstable();
        values.dedup();
        for value in values {
            let taken = fixed.get(&value).copied().unwrap_or(0);
            let vars_taking = vars.iter().filter(|var| var.can_be(value)).count();
            if taken == 0 && vars_taking < 2 {
                continue;
            }
            let count = count_equal(vars.iter().copied(), value);
            self.require(constraint!(count <= 1usize.saturating_sub(taken) as f64));
        }
        clashes
    }

    pub fn finish(self, objective: Expression) -> CompiledModel {
        CompiledModel {
            problem: self.problem,
            objective,
            constraints: self.constraints,
            watched: self.watched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SolveStatus;
    use crate::engine::{HighsEngine, SolvingEngine};
    use std::time::Duration;

    fn solve(model: CompiledModel) -> (SolveStatus, Vec<f64>) {
        let outcome = HighsEngine::default().solve(model, Duration::from_secs(10));
        let values = outcome
            .assignment
            .map(|a| (0..a.len()).map(|i| a.value(i)).collect())
            .unwrap_or_default();
        (outcome.status, values)
    }

    #[test]
    fn exactly_k_counts_equal_values() {
        let mut builder = ModelBuilder::new();
        let vars: Vec<IntVar> = (0..4).map(|_| builder.int_var(&[0, 1, 2])).collect();
        let refs: Vec<&IntVar> = vars.iter().collect();
        builder.exactly_k_equal(&refs, 2, 3);
        builder.at_most_k_equal(&refs, 0, 0);
        for var in &vars {
            builder.watch(var.value);
        }
        let (status, values) = solve(builder.finish(Expression::from(0.0)));
        assert!(matches!(status, SolveStatus::Optimal | SolveStatus::Feasible));
        let twos = values.iter().filter(|v| v.round() as usize == 2).count();
        let ones = values.iter().filter(|v| v.round() as usize == 1).count();
        assert_eq!((twos, ones), (3, 1));
    }

    #[test]
    fn element_follows_the_index() {
        let mut builder = ModelBuilder::new();
        let index = builder.int_var(&[0, 1, 2]);
        let teacher = builder.element(&index, &[7, 9, 7]);
        let literal = index.literal(1).unwrap();
        builder.require(constraint!(literal == 1));
        builder.watch(teacher.value);
        builder.watch(index.value);
        let (_, values) = solve(builder.finish(Expression::from(0.0)));
        assert_eq!(values[0].round() as usize, 9);
        assert_eq!(values[1].round() as usize, 1);
        assert!(teacher.can_be(7) && !teacher.can_be(1));
    }

    #[test]
    fn all_different_separates_variables_from_constants() {
        let mut builder = ModelBuilder::new();
        let a = builder.int_var(&[3, 4]);
        let b = builder.int_var(&[3, 4, 5]);
        let clashes = builder.all_different(&[4, 8, 8], &[&a, &b]);
        assert_eq!(clashes, vec![8]);
        builder.watch(a.value);
        builder.watch(b.value);
        let (_, values) = solve(builder.finish(Expression::from(0.0)));
        assert_eq!(values[0].round() as usize, 3);
        assert_eq!(values[1].round() as usize, 5);
    }

    #[test]
    fn all_different_without_room_is_infeasible() {
        let mut builder = ModelBuilder::new();
        let a = builder.int_var(&[1, 2]);
        let b = builder.int_var(&[1, 2]);
        let c = builder.int_var(&[1, 2]);
        builder.all_different(&[], &[&a, &b, &c]);
        builder.watch(a.value);
        let (status, _) = solve(builder.finish(Expression::from(0.0)));
        assert_eq!(status, SolveStatus::Infeasible);
    }

    #[test]
    fn indicator_and_penalty_track_occupancy() {
        let mut builder = ModelBuilder::new();
        let x = builder.binaries(3);
        builder.require(constraint!(x[0] + x[1] == 1));
        builder.require(constraint!(x[2] == 0));
        let first: Expression = x[..2].iter().copied().sum();
        let busy = builder.indicator(first, 2);
        let idle = builder.indicator(Expression::from(x[2]), 1);
        let gap = builder.abs_diff(Expression::from(busy), Expression::from(idle));
        builder.watch(busy);
        builder.watch(idle);
        builder.watch(gap);
        let (_, values) = solve(builder.finish(Expression::from(gap)));
        assert_eq!(values.iter().map(|v| v.round()).collect::<Vec<_>>(), vec![1.0, 0.0, 1.0]);
    }
}
