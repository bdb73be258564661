//! Supervision of the external broker process

pub mod supervisor;

pub use supervisor::{BrokerCommand, ProcessSupervisor, SupervisorState};
