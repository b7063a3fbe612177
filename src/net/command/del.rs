use super::Handler;
use crate::storage::KeyValueStorage;

/// `DEL key [key ...]`
///
/// Removes the values and expiries of every argument. The reply is the number of arguments,
/// the command name included, whether or not the keys existed.
#[derive(Debug, Clone, Copy)]
pub struct Del;

impl<KV> Handler<KV> for Del
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, args: &[String]) -> String {
        for key in args {
            storage.remove(key);
            storage.remove_expiry(key);
        }
        args.len().to_string()
    }
}
