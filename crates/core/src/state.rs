//! Named states as pure predicates over an entity's fields.
//!
//! A registry maps a state name ("active", "virtual", ...) to a predicate. A
//! state may be declared as a refinement of a parent state, in which case it
//! only holds when the parent holds too. Registries answer both single-record
//! questions (`is`) and bulk filtering (`filter`, `states_of`).
//!
//! Transition rules live with each aggregate; this layer only classifies.

use crate::error::{DomainError, DomainResult};

type Predicate<T> = fn(&T) -> bool;

#[derive(Debug)]
struct NamedState<T> {
    name: &'static str,
    parent: Option<usize>,
    predicate: Predicate<T>,
}

/// Registry of named state predicates for one record type.
#[derive(Debug)]
pub struct StateRegistry<T> {
    states: Vec<NamedState<T>>,
}

impl<T> Default for StateRegistry<T> {
    fn default() -> Self {
        Self { states: Vec::new() }
    }
}

impl<T> StateRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root-level state.
    ///
    /// Panics on a duplicate name; registries are built once from static tables.
    pub fn register(mut self, name: &'static str, predicate: Predicate<T>) -> Self {
        assert!(self.position(name).is_none(), "duplicate state `{name}`");
        self.states.push(NamedState {
            name,
            parent: None,
            predicate,
        });
        self
    }

    /// Register a state that refines `parent`.
    pub fn register_child(
        mut self,
        name: &'static str,
        parent: &'static str,
        predicate: Predicate<T>,
    ) -> Self {
        assert!(self.position(name).is_none(), "duplicate state `{name}`");
        let parent = self
            .position(parent)
            .unwrap_or_else(|| panic!("unknown parent state `{parent}`"));
        self.states.push(NamedState {
            name,
            parent: Some(parent),
            predicate,
        });
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }

    fn holds(&self, idx: usize, value: &T) -> bool {
        let state = &self.states[idx];
        let parent_holds = state.parent.is_none_or(|p| self.holds(p, value));
        parent_holds && (state.predicate)(value)
    }

    /// Registered state names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.states.iter().map(|s| s.name)
    }

    /// Does `value` satisfy the named state?
    pub fn is(&self, name: &str, value: &T) -> DomainResult<bool> {
        let idx = self
            .position(name)
            .ok_or_else(|| DomainError::not_found(format!("state `{name}`")))?;
        Ok(self.holds(idx, value))
    }

    /// Keep only the values in the named state.
    pub fn filter<'a, I>(&self, name: &str, values: I) -> DomainResult<Vec<&'a T>>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let idx = self
            .position(name)
            .ok_or_else(|| DomainError::not_found(format!("state `{name}`")))?;
        Ok(values.into_iter().filter(|v| self.holds(idx, v)).collect())
    }

    /// Every registered state `value` is currently in.
    pub fn states_of(&self, value: &T) -> Vec<&'static str> {
        (0..self.states.len())
            .filter(|&idx| self.holds(idx, value))
            .map(|idx| self.states[idx].name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Slot {
        open: bool,
        qty: i64,
    }

    fn registry() -> StateRegistry<Slot> {
        StateRegistry::new()
            .register("open", |s: &Slot| s.open)
            .register_child("open_with_stock", "open", |s: &Slot| s.qty > 0)
            .register("empty", |s: &Slot| s.qty == 0)
    }

    #[test]
    fn child_state_requires_parent() {
        let reg = registry();
        let closed = Slot { open: false, qty: 5 };
        assert!(!reg.is("open_with_stock", &closed).unwrap());
        let open = Slot { open: true, qty: 5 };
        assert!(reg.is("open_with_stock", &open).unwrap());
    }

    #[test]
    fn filter_projects_bulk_collections() {
        let reg = registry();
        let slots = vec![
            Slot { open: true, qty: 0 },
            Slot { open: true, qty: 3 },
            Slot { open: false, qty: 0 },
        ];
        assert_eq!(reg.filter("open", &slots).unwrap().len(), 2);
        assert_eq!(reg.filter("empty", &slots).unwrap().len(), 2);
        assert_eq!(reg.states_of(&slots[1]), vec!["open", "open_with_stock"]);
    }

    #[test]
    fn unknown_state_is_not_found() {
        let reg = registry();
        let err = reg.is("bogus", &Slot { open: true, qty: 0 }).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
