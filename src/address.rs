//! Structured addresses of random choices.
//!
//! An [`Address`] is an ordered path of typed segments, so `("cp", 3)` and `"cp3"` are
//! different addresses and comparisons never go through string formatting.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Name(String),
    Index(i64),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Name(name) => write!(f, "{name}"),
            Segment::Index(idx) => write!(f, "{idx}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Vec<Segment>);

impl Address {
    pub fn root() -> Self {
        Address(Vec::new())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Address(vec![Segment::Name(name.into())])
    }

    /// Append a name segment.
    pub fn then(mut self, name: impl Into<String>) -> Self {
        self.0.push(Segment::Name(name.into()));
        self
    }

    /// Append an index segment.
    pub fn index(mut self, idx: i64) -> Self {
        self.0.push(Segment::Index(idx));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &Address) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<&str> for Address {
    fn from(name: &str) -> Self {
        Address::name(name)
    }
}

impl From<(&str, i64)> for Address {
    fn from((name, idx): (&str, i64)) -> Self {
        Address::name(name).index(idx)
    }
}

impl From<(&str, usize)> for Address {
    fn from((name, idx): (&str, usize)) -> Self {
        Address::name(name).index(idx as i64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.0 {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}
