use super::{now_ms, wrong_arity, Handler, NIL};
use crate::storage::KeyValueStorage;

/// `GET key`
///
/// Expiry is applied lazily here: a key whose expiry instant has passed is removed together
/// with its expiry, and reads as absent.
#[derive(Debug, Clone, Copy)]
pub struct Get;

impl<KV> Handler<KV> for Get
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, args: &[String]) -> String {
        let key = match args {
            [_, key, ..] => key,
            _ => return wrong_arity("GET"),
        };
        storage
            .get_unexpired(key, now_ms())
            .unwrap_or_else(|| NIL.to_string())
    }
}
