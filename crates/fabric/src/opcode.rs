//! Byte-valued opcodes that lead every message on the wire.

use std::fmt;

use raubzug_core::RaubzugError;

/// First byte of every load-balancing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    StealRequest = 1,
    AsyncStealRequest = 2,
    BlockingStealRequest = 3,
    StealAndTableRequest = 4,
    AsyncStealAndTableRequest = 5,

    StealReplySuccess = 10,
    StealReplyFailed = 11,
    StealReplySuccessTable = 12,
    StealReplyFailedTable = 13,
    AsyncStealReplySuccess = 14,
    AsyncStealReplyFailed = 15,
    AsyncStealReplySuccessTable = 16,
    AsyncStealReplyFailedTable = 17,

    JobResultNormal = 20,
    JobResultException = 21,
}

impl Opcode {
    pub const ALL: [Opcode; 15] = [
        Opcode::StealRequest,
        Opcode::AsyncStealRequest,
        Opcode::BlockingStealRequest,
        Opcode::StealAndTableRequest,
        Opcode::AsyncStealAndTableRequest,
        Opcode::StealReplySuccess,
        Opcode::StealReplyFailed,
        Opcode::StealReplySuccessTable,
        Opcode::StealReplyFailedTable,
        Opcode::AsyncStealReplySuccess,
        Opcode::AsyncStealReplyFailed,
        Opcode::AsyncStealReplySuccessTable,
        Opcode::AsyncStealReplyFailedTable,
        Opcode::JobResultNormal,
        Opcode::JobResultException,
    ];

    /// Stable name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::StealRequest => "STEAL_REQUEST",
            Opcode::AsyncStealRequest => "ASYNC_STEAL_REQUEST",
            Opcode::BlockingStealRequest => "BLOCKING_STEAL_REQUEST",
            Opcode::StealAndTableRequest => "STEAL_AND_TABLE_REQUEST",
            Opcode::AsyncStealAndTableRequest => "ASYNC_STEAL_AND_TABLE_REQUEST",
            Opcode::StealReplySuccess => "STEAL_REPLY_SUCCESS",
            Opcode::StealReplyFailed => "STEAL_REPLY_FAILED",
            Opcode::StealReplySuccessTable => "STEAL_REPLY_SUCCESS_TABLE",
            Opcode::StealReplyFailedTable => "STEAL_REPLY_FAILED_TABLE",
            Opcode::AsyncStealReplySuccess => "ASYNC_STEAL_REPLY_SUCCESS",
            Opcode::AsyncStealReplyFailed => "ASYNC_STEAL_REPLY_FAILED",
            Opcode::AsyncStealReplySuccessTable => "ASYNC_STEAL_REPLY_SUCCESS_TABLE",
            Opcode::AsyncStealReplyFailedTable => "ASYNC_STEAL_REPLY_FAILED_TABLE",
            Opcode::JobResultNormal => "JOB_RESULT_NORMAL",
            Opcode::JobResultException => "JOB_RESULT_EXCEPTION",
        }
    }

    pub fn is_steal_request(self) -> bool {
        matches!(
            self,
            Opcode::StealRequest
                | Opcode::AsyncStealRequest
                | Opcode::BlockingStealRequest
                | Opcode::StealAndTableRequest
                | Opcode::AsyncStealAndTableRequest
        )
    }

    pub fn is_steal_reply(self) -> bool {
        (self as u8) >= 10 && (self as u8) <= 17
    }

    pub fn is_job_result(self) -> bool {
        matches!(self, Opcode::JobResultNormal | Opcode::JobResultException)
    }

    /// Asynchronous requests and the replies to them.
    pub fn is_async(self) -> bool {
        matches!(
            self,
            Opcode::AsyncStealRequest
                | Opcode::AsyncStealAndTableRequest
                | Opcode::AsyncStealReplySuccess
                | Opcode::AsyncStealReplyFailed
                | Opcode::AsyncStealReplySuccessTable
                | Opcode::AsyncStealReplyFailedTable
        )
    }

    /// Whether a fault-tolerance table is requested (requests) or attached
    /// (replies).
    pub fn carries_table(self) -> bool {
        matches!(
            self,
            Opcode::StealAndTableRequest
                | Opcode::AsyncStealAndTableRequest
                | Opcode::StealReplySuccessTable
                | Opcode::StealReplyFailedTable
                | Opcode::AsyncStealReplySuccessTable
                | Opcode::AsyncStealReplyFailedTable
        )
    }

    /// Steal replies that carry a task.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Opcode::StealReplySuccess
                | Opcode::StealReplySuccessTable
                | Opcode::AsyncStealReplySuccess
                | Opcode::AsyncStealReplySuccessTable
        )
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = RaubzugError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or(RaubzugError::UnknownOpcode(byte))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
