use super::Handler;
use crate::storage::KeyValueStorage;

/// `EXISTS key [key ...]`
///
/// Counts the keys that hold a value. A key named more than once is counted every time.
/// Expiry is not consulted.
#[derive(Debug, Clone, Copy)]
pub struct Exists;

impl<KV> Handler<KV> for Exists
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, args: &[String]) -> String {
        args.iter()
            .skip(1)
            .filter(|key| storage.exists(key))
            .count()
            .to_string()
    }
}
