//! Value matchers for convergence assertions.

use std::fmt::Debug;

/// A predicate over produced values with a human-readable description.
pub trait Matcher<T>: Send + Sync {
    /// Whether `value` is the expected state.
    fn matches(&self, value: &T) -> bool;

    /// Describes the expected state, e.g. `at least 9900`.
    fn describe(&self) -> String;
}

/// Matches values equal to an expected value.
#[derive(Debug, Clone)]
pub struct Equal<T>(T);

impl<T> Matcher<T> for Equal<T>
where
    T: PartialEq + Debug + Send + Sync,
{
    fn matches(&self, value: &T) -> bool {
        *value == self.0
    }

    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }
}

/// Matches values greater than or equal to a bound.
#[derive(Debug, Clone)]
pub struct AtLeast<T>(T);

impl<T> Matcher<T> for AtLeast<T>
where
    T: PartialOrd + Debug + Send + Sync,
{
    fn matches(&self, value: &T) -> bool {
        *value >= self.0
    }

    fn describe(&self) -> String {
        format!("at least {:?}", self.0)
    }
}

/// Matches values less than or equal to a bound.
#[derive(Debug, Clone)]
pub struct AtMost<T>(T);

impl<T> Matcher<T> for AtMost<T>
where
    T: PartialOrd + Debug + Send + Sync,
{
    fn matches(&self, value: &T) -> bool {
        *value <= self.0
    }

    fn describe(&self) -> String {
        format!("at most {:?}", self.0)
    }
}

/// Matches values accepted by a closure.
pub struct Satisfies<F> {
    description: String,
    predicate: F,
}

impl<T, F> Matcher<T> for Satisfies<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn matches(&self, value: &T) -> bool {
        (self.predicate)(value)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Expects exactly `expected`.
pub const fn equal<T>(expected: T) -> Equal<T> {
    Equal(expected)
}

/// Expects a value `>= bound`.
pub const fn at_least<T>(bound: T) -> AtLeast<T> {
    AtLeast(bound)
}

/// Expects a value `<= bound`.
pub const fn at_most<T>(bound: T) -> AtMost<T> {
    AtMost(bound)
}

/// Expects `predicate` to hold; `description` names the expected state.
pub fn satisfies<T, F>(description: impl Into<String>, predicate: F) -> Satisfies<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    Satisfies {
        description: description.into(),
        predicate,
    }
}
