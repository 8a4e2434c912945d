//! Reading Pipeline
//!
//! Broker delivery → [`RawEvent`] → [`NormalizedEvent`] → encoded payload →
//! hub broadcast. Deliveries are processed strictly one after another, so
//! broker order is preserved into the hub.

mod consumer;
mod transform;

pub use consumer::{Consumer, ConsumerError, ConsumerStats, Outcome};
pub use transform::{
    transform, transform_at, DecodeError, EncodeError, Encoder, JsonEncoder, NormalizedEvent,
    RawEvent, ValidationError,
};
