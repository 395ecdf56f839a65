use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::address::Address;

/// A dynamically typed random choice.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Vector(Vec<f64>),
    Array(ArrayD<f64>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Real(_) => "real",
            Value::Vector(_) => "vector",
            Value::Array(_) => "array",
        }
    }

    /// Equality that allows `tol` absolute slack on real components.
    pub fn approx_eq(&self, other: &Value, tol: f64) -> bool {
        let close = |a: f64, b: f64| a == b || (a - b).abs() <= tol;
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => close(*a, *b),
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| close(*a, *b))
            }
            (Value::Array(a), Value::Array(b)) => {
                a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(a, b)| close(*a, *b))
            }
            _ => false,
        }
    }
}

/// Rust types that can be stored in a [`ChoiceMap`].
pub trait ChoiceValue: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn into_value(self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

impl ChoiceValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl ChoiceValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl ChoiceValue for f64 {
    fn into_value(self) -> Value {
        Value::Real(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(x) => Some(*x),
            _ => None,
        }
    }
}

impl ChoiceValue for Vec<f64> {
    fn into_value(self) -> Value {
        Value::Vector(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Vector(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl ChoiceValue for ArrayD<f64> {
    fn into_value(self) -> Value {
        Value::Array(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(a) => Some(a.clone()),
            _ => None,
        }
    }
}

/// Address to value map, the storage of traces and proposal outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceMap {
    choices: BTreeMap<Address, Value>,
}

impl ChoiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: ChoiceValue>(&mut self, addr: impl Into<Address>, value: V) -> Option<Value> {
        self.choices.insert(addr.into(), value.into_value())
    }

    pub fn insert(&mut self, addr: Address, value: Value) -> Option<Value> {
        self.choices.insert(addr, value)
    }

    /// Builder style [`ChoiceMap::set`].
    pub fn with<V: ChoiceValue>(mut self, addr: impl Into<Address>, value: V) -> Self {
        self.set(addr, value);
        self
    }

    pub fn get(&self, addr: &Address) -> Option<&Value> {
        self.choices.get(addr)
    }

    pub fn get_as<V: ChoiceValue>(&self, addr: &Address) -> Option<V> {
        self.choices.get(addr).and_then(V::from_value)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.choices.contains_key(addr)
    }

    pub fn remove(&mut self, addr: &Address) -> Option<Value> {
        self.choices.remove(addr)
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Value)> {
        self.choices.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.choices.keys()
    }

    /// Insert every choice of `other`, overwriting existing entries.
    pub fn merge(&mut self, other: &ChoiceMap) {
        for (addr, value) in other.iter() {
            self.choices.insert(addr.clone(), value.clone());
        }
    }

    /// Same addresses, values equal up to `tol` on real components.
    pub fn approx_eq(&self, other: &ChoiceMap, tol: f64) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((a1, v1), (a2, v2))| a1 == a2 && v1.approx_eq(v2, tol))
    }

    /// The first address whose value differs beyond `tol`, for diagnostics.
    pub fn first_difference(&self, other: &ChoiceMap, tol: f64) -> Option<Address> {
        for (addr, value) in self.iter() {
            match other.get(addr) {
                Some(v) if v.approx_eq(value, tol) => {}
                _ => return Some(addr.clone()),
            }
        }
        other.addresses().find(|a| !self.contains(a)).cloned()
    }
}

impl FromIterator<(Address, Value)> for ChoiceMap {
    fn from_iter<I: IntoIterator<Item = (Address, Value)>>(iter: I) -> Self {
        ChoiceMap {
            choices: iter.into_iter().collect(),
        }
    }
}
