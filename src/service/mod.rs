//! Broker service tying the protocol stages to the result pipe.

pub mod broker;

pub use broker::RequestBroker;
