use super::Handler;
use crate::storage::KeyValueStorage;

/// `LPUSH key value [value ...]` and `RPUSH key value [value ...]`
///
/// Pushes the values one at a time in argument order and replies with the length of the list
/// after the last push, or 0 when there's nothing to push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Prepend to the list
    Front,
    /// Append to the list
    Back,
}

impl<KV> Handler<KV> for Push
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, args: &[String]) -> String {
        let (key, values) = match args {
            [_, key, values @ ..] => (key, values),
            _ => return "0".to_string(),
        };
        let mut len = 0;
        for value in values {
            len = match self {
                Self::Front => storage.push_front(key, value.clone()),
                Self::Back => storage.push_back(key, value.clone()),
            };
        }
        len.to_string()
    }
}
