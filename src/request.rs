//! Watch-request records, their wire form, and the events emitted on a match.
use crate::error::Error;
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque 32-byte request identifier, hex-encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId([u8; 32]);

impl RequestId {
    /// Wrap raw identifier bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)
            .map_err(|e| Error::InvalidRequest(format!("id is not hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| Error::InvalidRequest("id must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for RequestId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> String {
        id.to_string()
    }
}

/// What a request watches for. Exactly one variant per request, by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Payment of at least the request's `value` to this output script.
    Pays {
        /// Output script to compare byte-for-byte against transaction outputs.
        script: ScriptBuf,
    },
    /// Spend of one specific prior output, matched purely on coin identity.
    Spends {
        /// The watched outpoint.
        outpoint: OutPoint,
    },
}

/// Which side of a transaction satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedVia {
    /// An output paid the watched script.
    Pays,
    /// An input spent the watched outpoint.
    Spends,
}

impl fmt::Display for MatchedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedVia::Pays => f.write_str("pays"),
            MatchedVia::Spends => f.write_str("spends"),
        }
    }
}

/// Lifecycle state of a request. `Pending -> Satisfied` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Registered, not yet matched by any transaction.
    Pending,
    /// Matched; `satisfied_by` records the transaction.
    Satisfied,
}

/// Reference to the transaction that satisfied a request. Set once, immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatisfiedBy {
    /// Id of the satisfying transaction.
    pub txid: Txid,
    /// Height of the confirming block, or `None` while only seen in mempool.
    pub height: Option<u32>,
}

/// A registered watch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier, the store key.
    pub id: RequestId,
    /// Client-side correlation tag; not used for matching, echoed in events.
    pub address: String,
    /// Minimum satisfying amount for `Pays`; informational for `Spends`.
    pub value: Amount,
    /// What the request watches for.
    pub target: Target,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// Satisfying transaction, once `Satisfied`.
    pub satisfied_by: Option<SatisfiedBy>,
}

impl Request {
    /// Validate a wire-form registration into a well-typed pending request.
    ///
    /// # Errors
    /// `InvalidRequest` if the id is malformed, `value` is negative, or the
    /// params carry both or neither of `pays`/`spends`.
    pub fn from_params(params: RequestParams) -> Result<Self, Error> {
        let id: RequestId = params.id.parse()?;

        if params.value < 0 {
            return Err(Error::InvalidRequest(format!(
                "value must be non-negative, got {}",
                params.value
            )));
        }
        let value = Amount::from_sat(params.value as u64);

        let target = match (params.pays, params.spends) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidRequest(
                    "request sets both pays and spends".into(),
                ))
            }
            (None, None) => {
                return Err(Error::InvalidRequest(
                    "request sets neither pays nor spends".into(),
                ))
            }
            (Some(script_hex), None) => {
                let raw = hex::decode(&script_hex)
                    .map_err(|e| Error::InvalidRequest(format!("pays is not hex: {e}")))?;
                Target::Pays {
                    script: ScriptBuf::from_bytes(raw),
                }
            }
            (None, Some(coin)) => {
                // Big-endian display hex, the bitcoin crate's parse convention.
                let txid = Txid::from_str(&coin.hash)
                    .map_err(|e| Error::InvalidRequest(format!("spends.hash: {e}")))?;
                Target::Spends {
                    outpoint: OutPoint::new(txid, coin.index),
                }
            }
        };

        Ok(Self {
            id,
            address: params.address,
            value,
            target,
            status: RequestStatus::Pending,
            satisfied_by: None,
        })
    }
}

/// Coin reference as it appears on the wire: big-endian txid hex plus index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRef {
    /// Transaction hash, big-endian display hex.
    pub hash: String,
    /// Output index within that transaction.
    pub index: u32,
}

/// Loosely-typed registration body as received from a transport.
///
/// `pays` and `spends` are both optional here; [`Request::from_params`] is
/// where the exactly-one-of-two rule is enforced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    /// 32-byte request id, hex-encoded.
    pub id: String,
    /// Client correlation tag.
    pub address: String,
    /// Minimum satisfying amount in satoshis.
    pub value: i64,
    /// Output script to watch, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pays: Option<String>,
    /// Outpoint to watch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spends: Option<CoinRef>,
}

/// Notification emitted when a transaction satisfies a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvent {
    /// Id of the satisfied request.
    pub request_id: RequestId,
    /// The request's correlation tag, echoed verbatim.
    pub address: String,
    /// Id of the satisfying transaction.
    pub txid: Txid,
    /// Confirming block height, or `None` for a mempool match.
    pub height: Option<u32>,
    /// Whether an output script or an input outpoint matched.
    pub matched_via: MatchedVia,
}
