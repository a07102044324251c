//! Symbolic store states.
//!
//! A state assigns every sort a predicate saying which objects (or tuples)
//! exist. The predicate of a slot takes the parameters of the context it was
//! created in, then the object. States are never mutated; a statement builds a
//! new one, usually sharing most slots with its predecessor.

use crate::fol::{Formula, PredId, SortId, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateSlot {
    pub pred: PredId,

    /// Number of context parameters the predicate takes
    pub depth: usize,
}

impl StateSlot {
    pub fn new(pred: PredId, depth: usize) -> Self {
        Self { pred, depth }
    }

    /// `o` exists; extra (deeper) parameters are ignored
    pub fn holds(&self, params: &[Term], object: Term) -> Formula {
        let mut args = params[..self.depth].to_vec();
        args.push(object);
        Formula::atom(self.pred, args)
    }
}

/// One slot per sort, indexed by sort id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    slots: Vec<StateSlot>,
}

impl State {
    pub fn new(slots: Vec<StateSlot>) -> Self {
        Self { slots }
    }

    pub fn slot(&self, sort: SortId) -> StateSlot {
        self.slots[sort.0]
    }

    pub fn holds(&self, sort: SortId, params: &[Term], object: Term) -> Formula {
        self.slot(sort).holds(params, object)
    }

    pub fn sorts(&self) -> impl Iterator<Item = SortId> + '_ {
        (0..self.slots.len()).map(SortId)
    }

    /// Sorts whose slots differ between the two states
    pub fn sort_difference(&self, other: &State) -> Vec<SortId> {
        self.slots
            .iter()
            .zip(&other.slots)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| SortId(i))
            .collect()
    }

    /// Same state except for one sort
    pub fn link(&self, sort: SortId, slot: StateSlot) -> State {
        self.with_slots([(sort, slot)])
    }

    pub fn with_slots(&self, changes: impl IntoIterator<Item = (SortId, StateSlot)>) -> State {
        let mut slots = self.slots.clone();
        for (sort, slot) in changes {
            slots[sort.0] = slot;
        }
        State { slots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_changes_one_sort() {
        let a = State::new(vec![StateSlot::new(PredId(0), 0), StateSlot::new(PredId(1), 0)]);
        let b = a.link(SortId(1), StateSlot::new(PredId(2), 1));
        assert_eq!(a.sort_difference(&b), vec![SortId(1)]);
        assert!(a.sort_difference(&a).is_empty());
        assert_eq!(b.slot(SortId(0)), a.slot(SortId(0)));
    }

    #[test]
    fn test_holds_truncates_parameters() {
        let slot = StateSlot::new(PredId(3), 1);
        let params = vec![Term::var("P1"), Term::var("P2")];
        assert_eq!(
            slot.holds(&params, Term::var("O")),
            Formula::atom(PredId(3), vec![Term::var("P1"), Term::var("O")])
        );
    }
}
