pub mod broker;
pub mod decoder;
#[cfg(test)]
mod tests;

pub use broker::{DeliveryHandler, MessageBroker, MessageBrokerTrait};
pub use decoder::{decode, DecodeError};
