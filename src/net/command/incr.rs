use super::{wrong_arity, Handler, NOT_AN_INTEGER};
use crate::storage::KeyValueStorage;

/// `INCR key` and `DECR key`
///
/// Adds the step to the integer stored at the key, treating a missing key as 0. Only values
/// made of ASCII digits are counters, anything else is left untouched and reported as an
/// error. The read-modify-write is atomic with respect to other commands on the same key.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    name: &'static str,
    delta: i64,
}

impl Step {
    /// Adds one
    pub const INCR: Self = Self {
        name: "INCR",
        delta: 1,
    };

    /// Subtracts one
    pub const DECR: Self = Self {
        name: "DECR",
        delta: -1,
    };

    fn apply(&self, current: Option<&str>) -> Result<String, &'static str> {
        let n = match current {
            None => 0,
            Some(v) if is_counter(v) => v.parse::<i64>().map_err(|_| NOT_AN_INTEGER)?,
            Some(_) => return Err(NOT_AN_INTEGER),
        };
        n.checked_add(self.delta)
            .map(|n| n.to_string())
            .ok_or(NOT_AN_INTEGER)
    }
}

impl<KV> Handler<KV> for Step
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, args: &[String]) -> String {
        let key = match args {
            [_, key, ..] => key,
            _ => return wrong_arity(self.name),
        };
        storage
            .update(key, |current| self.apply(current))
            .unwrap_or_else(|reply| reply.to_string())
    }
}

fn is_counter(v: &str) -> bool {
    !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit())
}
