use super::{
    now_ms, wrong_arity, Handler, LINE_BREAK_IN_VALUE, NOT_AN_INTEGER, OK, SYNTAX_ERROR,
};
use crate::storage::KeyValueStorage;

/// `SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-milliseconds]`
///
/// Stores the value and, when an option is given, the absolute instant at which it expires.
/// A plain `SET` leaves any expiry that was previously recorded for the key in place. Values
/// are sent back as simple strings, so they can't hold a line break.
#[derive(Debug, Clone, Copy)]
pub struct Set;

impl<KV> Handler<KV> for Set
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, args: &[String]) -> String {
        let (key, value) = match args {
            [_, key, value, ..] => (key, value),
            _ => return wrong_arity("SET"),
        };

        // Validate everything before touching the storage
        if value.contains(|c: char| c == '\r' || c == '\n') {
            return LINE_BREAK_IN_VALUE.to_string();
        }
        let expiry = match &args[3..] {
            [] => None,
            [option, amount] => match expiry_at(option, amount, now_ms()) {
                Ok(at) => Some(at),
                Err(reply) => return reply.to_string(),
            },
            _ => return SYNTAX_ERROR.to_string(),
        };

        storage.set_with_expiry(key, value.clone(), expiry);
        OK.to_string()
    }
}

/// Turns an expiry option into an absolute instant in milliseconds since the Unix epoch.
fn expiry_at(option: &str, amount: &str, now_ms: i64) -> Result<i64, &'static str> {
    let (unit, relative) = match option {
        "EX" => (1000, true),
        "PX" => (1, true),
        "EXAT" => (1000, false),
        "PXAT" => (1, false),
        _ => return Err(SYNTAX_ERROR),
    };
    let amount: i64 = amount.parse().map_err(|_| NOT_AN_INTEGER)?;
    let at = amount.checked_mul(unit).ok_or(NOT_AN_INTEGER)?;
    if relative {
        at.checked_add(now_ms).ok_or(NOT_AN_INTEGER)
    } else {
        Ok(at)
    }
}
