use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PeerId, Stamp};

/// An exception raised while executing a task, carried back to the owner as
/// data rather than as an engine error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteException {
    pub kind: String,
    pub message: String,
}

impl RemoteException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The result slot of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskOutcome {
    /// MessagePack-encoded return value.
    Value(#[serde(with = "serde_bytes")] Vec<u8>),
    Exception(RemoteException),
}

/// A stealable unit of work.
///
/// At any moment a task is held by exactly one of: the local work queue, the
/// outstanding job registry (while a thief executes it), or the
/// fault-tolerance subsystem (once orphaned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    stamp: Stamp,
    owner: PeerId,
    /// Serialized parameters; interpretation belongs to the task runner.
    #[serde(with = "serde_bytes")]
    params: Vec<u8>,
    stealer: Option<PeerId>,
    outcome: Option<TaskOutcome>,
    sent_exception: bool,
    orphan: bool,
    spawned_at: DateTime<Utc>,
}

impl Task {
    /// Create a task owned by `owner`.
    pub fn new(stamp: Stamp, owner: PeerId, params: Vec<u8>) -> Self {
        Self {
            stamp,
            owner,
            params,
            stealer: None,
            outcome: None,
            sent_exception: false,
            orphan: false,
            spawned_at: Utc::now(),
        }
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    /// Re-home the task, e.g. when fault tolerance knows a new owner for an
    /// orphan.
    pub fn set_owner(&mut self, owner: PeerId) {
        self.owner = owner;
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Decode the parameters with MessagePack.
    pub fn decode_params<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.params)
    }

    pub fn stealer(&self) -> Option<&PeerId> {
        self.stealer.as_ref()
    }

    pub fn set_stealer(&mut self, stealer: PeerId) {
        self.stealer = Some(stealer);
    }

    pub fn clear_stealer(&mut self) {
        self.stealer = None;
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    pub fn set_outcome(&mut self, outcome: TaskOutcome) {
        self.outcome = Some(outcome);
    }

    pub fn exception(&self) -> Option<&RemoteException> {
        match &self.outcome {
            Some(TaskOutcome::Exception(e)) => Some(e),
            _ => None,
        }
    }

    pub fn already_sent_exception(&self) -> bool {
        self.sent_exception
    }

    pub fn mark_exception_sent(&mut self) {
        self.sent_exception = true;
    }

    pub fn is_orphan(&self) -> bool {
        self.orphan
    }

    pub fn mark_orphan(&mut self) {
        self.orphan = true;
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: serde_bytes_buf::ByteBuf = Deserialize::deserialize(d)?;
        Ok(bytes.0)
    }

    /// Accepts both borrowed and owned byte representations, so the same
    /// task decodes from MessagePack and from self-describing formats.
    mod serde_bytes_buf {
        use std::fmt;

        use serde::de::{Deserialize, Deserializer, SeqAccess, Visitor};

        pub struct ByteBuf(pub Vec<u8>);

        impl<'de> Deserialize<'de> for ByteBuf {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                d.deserialize_byte_buf(ByteBufVisitor)
            }
        }

        struct ByteBufVisitor;

        impl<'de> Visitor<'de> for ByteBufVisitor {
            type Value = ByteBuf;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte buffer")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<ByteBuf, E> {
                Ok(ByteBuf(v.to_vec()))
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<ByteBuf, E> {
                Ok(ByteBuf(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ByteBuf, A::Error> {
                let mut out = Vec::new();
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(ByteBuf(out))
            }
        }
    }
}
