//! Inbound envelope model and wire codec.

pub mod codec;
pub mod model;

pub use codec::parse;
pub use model::{Classification, Document, Envelope, EnvelopePayment, OcrDataField};
