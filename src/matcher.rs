use crate::request::{MatchedVia, Request, Target};
use bitcoin::Transaction;

/// Decide whether `tx` satisfies `request`. Pure and infallible: malformed or
/// coinbase transactions simply fail to match (a coinbase prevout is never a
/// real coin, but its outputs are still eligible for `Pays`).
pub fn evaluate(tx: &Transaction, request: &Request) -> Option<MatchedVia> {
    match &request.target {
        Target::Pays { script } => tx
            .output
            .iter()
            // First qualifying output wins; extra qualifying outputs in the
            // same tx do not produce extra matches.
            .find(|out| out.script_pubkey == *script && out.value >= request.value)
            .map(|_| MatchedVia::Pays),
        Target::Spends { outpoint } => tx
            .input
            .iter()
            // A coinbase prevout is not a real coin and never matches.
            .any(|input| !input.previous_output.is_null() && input.previous_output == *outpoint)
            .then_some(MatchedVia::Spends),
    }
}
