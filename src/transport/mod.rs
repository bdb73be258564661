//! Network clients the harness drives against the broker

pub mod mqtt;
