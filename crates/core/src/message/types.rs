//! Wire format of the requests members send each other.
//!
//! Every frame is a JSON encoded [Envelope] carried in a
//! [TransportMessage::Custom](chordring_transport::core::transport::TransportMessage::Custom).
//! A request names an [Operation] and passes positional JSON arguments:
//! ring ids as canonical hex strings, members as [NodeInfo] objects.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::dht::NodeInfo;
use crate::dht::RingId;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::storage::ValueSet;

/// A request or the response correlated to it by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Ask the remote member to run `op`.
    Request {
        /// Identifier chosen by the sender, never reused.
        id: u64,
        /// Name of the [Operation].
        op: String,
        /// Positional arguments.
        args: Vec<Value>,
    },
    /// Outcome of a request.
    Response {
        /// Identifier of the request.
        id: u64,
        /// Whether `result` or `error` is set.
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorKind>,
    },
}

impl Envelope {
    pub fn request(id: u64, op: Operation, args: Vec<Value>) -> Self {
        Self::Request {
            id,
            op: op.to_string(),
            args,
        }
    }

    pub fn success(id: u64, result: Value) -> Self {
        Self::Response {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, kind: ErrorKind) -> Self {
        Self::Response {
            id,
            ok: false,
            result: None,
            error: Some(kind),
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Request { id, .. } => *id,
            Self::Response { id, .. } => *id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Operations a member serves to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `[id]` -> member responsible for `id`.
    FindSuccessor,
    /// `[]` -> predecessor or null.
    GetPredecessor,
    /// `[]` -> successor list.
    GetSuccessors,
    /// `[member]`, the member might be the predecessor.
    Notify,
    /// `[key, value]` on the owner.
    Insert,
    /// `[key]` on the owner -> values.
    Retrieve,
    /// `[key, value]` on the owner.
    Remove,
    /// `[[{key, values}]]`, keys handed over by another member.
    InsertEntries,
    /// `[[{key, values}]]`, copies pushed by a predecessor that owns the keys.
    Replicate,
    /// `[key, value]`, the owner removed a value it had replicated.
    RemoveReplica,
    /// `[leaver, predecessor | null, [successors]]`, a neighbour departs.
    Leaving,
    /// `[]`, liveness check.
    Ping,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindSuccessor => "findSuccessor",
            Self::GetPredecessor => "getPredecessor",
            Self::GetSuccessors => "getSuccessors",
            Self::Notify => "notify",
            Self::Insert => "insert",
            Self::Retrieve => "retrieve",
            Self::Remove => "remove",
            Self::InsertEntries => "insertEntries",
            Self::Replicate => "replicate",
            Self::RemoveReplica => "removeReplica",
            Self::Leaving => "leaving",
            Self::Ping => "ping",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "findSuccessor" => Self::FindSuccessor,
            "getPredecessor" => Self::GetPredecessor,
            "getSuccessors" => Self::GetSuccessors,
            "notify" => Self::Notify,
            "insert" => Self::Insert,
            "retrieve" => Self::Retrieve,
            "remove" => Self::Remove,
            "insertEntries" => Self::InsertEntries,
            "replicate" => Self::Replicate,
            "removeReplica" => Self::RemoveReplica,
            "leaving" => Self::Leaving,
            "ping" => Self::Ping,
            x => return Err(Error::UnsupportedOperation(x.to_string())),
        })
    }
}

/// One key and its values, the unit of bulk transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: RingId,
    pub values: ValueSet,
}

impl From<(RingId, ValueSet)> for KeyEntry {
    fn from((key, values): (RingId, ValueSet)) -> Self {
        Self { key, values }
    }
}

impl From<KeyEntry> for (RingId, ValueSet) {
    fn from(entry: KeyEntry) -> Self {
        (entry.key, entry.values)
    }
}

/// Decode positional argument `index`.
pub fn arg<T>(args: &[Value], index: usize) -> Result<T>
where T: DeserializeOwned {
    let v = args
        .get(index)
        .ok_or_else(|| Error::InvalidArgument(format!("missing argument {index}")))?;
    serde_json::from_value(v.clone())
        .map_err(|e| Error::InvalidArgument(format!("argument {index}: {e}")))
}

/// Decode a ring id argument. Bad hex is a [Error::MalformedIdentifier].
pub fn id_arg(args: &[Value], index: usize) -> Result<RingId> {
    let s: String = arg(args, index)?;
    RingId::from_canonical_str(&s)
}

/// Decode a stored value. `null` stands for an undefined value and is refused.
pub fn value_arg(args: &[Value], index: usize) -> Result<Value> {
    match arg::<Value>(args, index)? {
        Value::Null => Err(Error::InvalidArgument(format!("argument {index} is null"))),
        v => Ok(v),
    }
}

/// Decode a member argument, rejecting descriptors whose ring id does not match.
pub fn node_arg(args: &[Value], index: usize) -> Result<NodeInfo> {
    let node: NodeInfo = arg(args, index)?;
    if !node.is_valid() {
        return Err(Error::InvalidArgument(format!("invalid member {node}")));
    }
    Ok(node)
}

/// Decode an optional member argument, `null` meaning none.
pub fn optional_node_arg(args: &[Value], index: usize) -> Result<Option<NodeInfo>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => node_arg(args, index).map(Some),
    }
}
