//! Communication fabric contract consumed by the load balancer, the wire
//! opcodes and typed messages exchanged over it, and an in-process
//! implementation used by tests and the simulator.

pub mod local;
pub mod message;
pub mod opcode;
pub mod protocol;
pub mod traits;

pub use local::{LocalFabric, LocalNetwork};
pub use message::{ReadMessage, WriteMessage};
pub use opcode::Opcode;
pub use protocol::{JobResult, StealReply, StealRequest, Synchrony, WireMessage};
pub use traits::{Connection, Fabric, MembershipEvent, Upcall};
