//! Typed load-balancing messages and their wire encoding.
//!
//! | message      | layout                                           |
//! |--------------|--------------------------------------------------|
//! | steal request| opcode                                           |
//! | steal reply  | opcode, [table], [task]                          |
//! | job result   | `JOB_RESULT_NORMAL`, stamp, value bytes          |
//! |              | `JOB_RESULT_EXCEPTION`, exception, stamp         |

use raubzug_core::{RaubzugError, RemoteException, ResultTable, Stamp, Task};

use crate::message::{ReadMessage, WriteMessage};
use crate::opcode::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Synchrony {
    /// The requester waits for the reply.
    Sync,
    /// The requester keeps working; the reply is handled when it arrives.
    Async,
}

/// A request for one task from the victim's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealRequest {
    pub synchrony: Synchrony,
    /// The victim should wait for work instead of failing immediately.
    /// Only synchronous requests block.
    pub blocking: bool,
    /// The requester also wants the victim's fault-tolerance table.
    /// Blocking requests never ask for one.
    pub wants_table: bool,
}

impl StealRequest {
    pub fn new(synchrony: Synchrony, blocking: bool, wants_table: bool) -> Self {
        let blocking = blocking && synchrony == Synchrony::Sync;
        Self {
            synchrony,
            blocking,
            wants_table: wants_table && !blocking,
        }
    }

    /// The same request, answered without waiting for work.
    pub fn without_blocking(self) -> Self {
        Self {
            blocking: false,
            ..self
        }
    }

    pub fn opcode(&self) -> Opcode {
        match (self.synchrony, self.blocking, self.wants_table) {
            (Synchrony::Sync, true, _) => Opcode::BlockingStealRequest,
            (Synchrony::Sync, false, false) => Opcode::StealRequest,
            (Synchrony::Sync, false, true) => Opcode::StealAndTableRequest,
            (Synchrony::Async, _, false) => Opcode::AsyncStealRequest,
            (Synchrony::Async, _, true) => Opcode::AsyncStealAndTableRequest,
        }
    }

    pub fn from_opcode(op: Opcode) -> Option<Self> {
        let request = match op {
            Opcode::StealRequest => Self::new(Synchrony::Sync, false, false),
            Opcode::BlockingStealRequest => Self::new(Synchrony::Sync, true, false),
            Opcode::StealAndTableRequest => Self::new(Synchrony::Sync, false, true),
            Opcode::AsyncStealRequest => Self::new(Synchrony::Async, false, false),
            Opcode::AsyncStealAndTableRequest => Self::new(Synchrony::Async, false, true),
            _ => return None,
        };
        Some(request)
    }
}

/// Answer to a [`StealRequest`]; carries a task on success.
#[derive(Debug, Clone)]
pub struct StealReply {
    /// Mirrors the synchrony of the request being answered.
    pub synchrony: Synchrony,
    pub task: Option<Task>,
    pub table: Option<ResultTable>,
}

impl StealReply {
    pub fn opcode(&self) -> Opcode {
        match (self.synchrony, self.task.is_some(), self.table.is_some()) {
            (Synchrony::Sync, true, false) => Opcode::StealReplySuccess,
            (Synchrony::Sync, false, false) => Opcode::StealReplyFailed,
            (Synchrony::Sync, true, true) => Opcode::StealReplySuccessTable,
            (Synchrony::Sync, false, true) => Opcode::StealReplyFailedTable,
            (Synchrony::Async, true, false) => Opcode::AsyncStealReplySuccess,
            (Synchrony::Async, false, false) => Opcode::AsyncStealReplyFailed,
            (Synchrony::Async, true, true) => Opcode::AsyncStealReplySuccessTable,
            (Synchrony::Async, false, true) => Opcode::AsyncStealReplyFailedTable,
        }
    }

    pub fn is_success(&self) -> bool {
        self.task.is_some()
    }
}

/// The outcome of a stolen task, sent back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Normal { stamp: Stamp, value: Vec<u8> },
    Exception { exception: RemoteException, stamp: Stamp },
}

impl JobResult {
    pub fn stamp(&self) -> &Stamp {
        match self {
            JobResult::Normal { stamp, .. } | JobResult::Exception { stamp, .. } => stamp,
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            JobResult::Normal { .. } => Opcode::JobResultNormal,
            JobResult::Exception { .. } => Opcode::JobResultException,
        }
    }
}

/// Every message of the load-balancing protocol.
#[derive(Debug, Clone)]
pub enum WireMessage {
    StealRequest(StealRequest),
    StealReply(StealReply),
    JobResult(JobResult),
}

impl WireMessage {
    pub fn opcode(&self) -> Opcode {
        match self {
            WireMessage::StealRequest(r) => r.opcode(),
            WireMessage::StealReply(r) => r.opcode(),
            WireMessage::JobResult(r) => r.opcode(),
        }
    }

    pub fn write_to(&self, m: &mut WriteMessage) -> Result<(), RaubzugError> {
        m.write_byte(self.opcode().into());
        match self {
            WireMessage::StealRequest(_) => {}
            WireMessage::StealReply(reply) => {
                if let Some(table) = &reply.table {
                    m.write_object(table)?;
                }
                if let Some(task) = &reply.task {
                    m.write_object(task)?;
                }
            }
            WireMessage::JobResult(JobResult::Normal { stamp, value }) => {
                m.write_object(stamp)?;
                m.write_bytes(value);
            }
            WireMessage::JobResult(JobResult::Exception { exception, stamp }) => {
                m.write_object(exception)?;
                m.write_object(stamp)?;
            }
        }
        Ok(())
    }

    /// Decode one message. An unknown leading byte is
    /// [`RaubzugError::UnknownOpcode`].
    pub fn read_from(m: &mut ReadMessage) -> Result<Self, RaubzugError> {
        let op = Opcode::try_from(m.read_byte()?)?;

        if let Some(request) = StealRequest::from_opcode(op) {
            return Ok(WireMessage::StealRequest(request));
        }

        let message = match op {
            Opcode::JobResultNormal => {
                let stamp = m.read_object()?;
                let value = m.read_bytes()?;
                WireMessage::JobResult(JobResult::Normal { stamp, value })
            }
            Opcode::JobResultException => {
                let exception = m.read_object()?;
                let stamp = m.read_object()?;
                WireMessage::JobResult(JobResult::Exception { exception, stamp })
            }
            reply => {
                let synchrony = if reply.is_async() {
                    Synchrony::Async
                } else {
                    Synchrony::Sync
                };
                let table = if reply.carries_table() {
                    Some(m.read_object()?)
                } else {
                    None
                };
                let task = if reply.is_success() {
                    Some(m.read_object()?)
                } else {
                    None
                };
                WireMessage::StealReply(StealReply {
                    synchrony,
                    task,
                    table,
                })
            }
        };
        Ok(message)
    }
}
