use super::Handler;
use crate::storage::KeyValueStorage;

/// Replies with fixed text regardless of the arguments. Serves `COMMAND`, `PING` and `ECHO`.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub &'static str);

impl<KV> Handler<KV> for Constant
where
    KV: KeyValueStorage,
{
    fn execute(&self, _: &KV, _: &[String]) -> String {
        self.0.to_string()
    }
}
