use thiserror::Error;

use crate::address::Address;
use crate::choices::{ChoiceMap, ChoiceValue, Value};
use crate::distributions::DistError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("no choice at address {0}")]
    Missing(Address),
    #[error("choice at address {0} was not consumed by the model")]
    Unconsumed(Address),
    #[error("new address {0} has no constraint")]
    Unconstrained(Address),
    #[error("address {0} was sampled twice")]
    Duplicate(Address),
    #[error("choice at {addr} is a {found}, expected {expected}")]
    WrongType {
        addr: Address,
        expected: &'static str,
        found: &'static str,
    },
    #[error("distribution at {addr} failed: {source}")]
    Distribution {
        addr: Address,
        #[source]
        source: DistError,
    },
}

/// Hint to `Trace::update` about how the arguments changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgDiff {
    #[default]
    NoChange,
    Unknown,
}

/// Result of `Trace::update`.
#[derive(Debug, Clone)]
pub struct TraceUpdate<T> {
    pub trace: T,
    /// `score(new) - score(old)`
    pub weight: f64,
    /// Previous values of overwritten choices and of choices the new trace no longer uses.
    pub discard: ChoiceMap,
}

/// An immutable record of one execution of a generative model.
pub trait Trace: Clone + Send + Sync {
    fn choices(&self) -> &ChoiceMap;

    /// Total log probability of all choices.
    fn score(&self) -> f64;

    /// A new trace with `constraints` written over the current choices.
    fn update(&self, constraints: &ChoiceMap, diff: ArgDiff) -> Result<TraceUpdate<Self>, TraceError>;

    fn get(&self, addr: &Address) -> Option<&Value> {
        self.choices().get(addr)
    }

    fn get_as<V: ChoiceValue>(&self, addr: &Address) -> Result<V, TraceError> {
        read_choice(self.choices(), addr)
    }
}

/// Typed read of one choice with precise errors.
pub fn read_choice<V: ChoiceValue>(choices: &ChoiceMap, addr: &Address) -> Result<V, TraceError> {
    let value = choices
        .get(addr)
        .ok_or_else(|| TraceError::Missing(addr.clone()))?;
    V::from_value(value).ok_or_else(|| TraceError::WrongType {
        addr: addr.clone(),
        expected: std::any::type_name::<V>(),
        found: value.kind(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_reads() {
        let choices = ChoiceMap::new().with("x", 1.5).with(("n", 2i64), 3i64);
        assert_eq!(read_choice::<f64>(&choices, &"x".into()), Ok(1.5));
        assert_eq!(read_choice::<i64>(&choices, &("n", 2i64).into()), Ok(3));
        assert_eq!(
            read_choice::<f64>(&choices, &"y".into()),
            Err(TraceError::Missing("y".into()))
        );
        assert!(matches!(
            read_choice::<bool>(&choices, &"x".into()),
            Err(TraceError::WrongType { found: "real", .. })
        ));
    }
}
