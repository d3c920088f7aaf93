//! Delivery channels for outreach sequences.
//!
//! Email and SMS providers behind the engine's `NotificationDispatcher`
//! interface, plus normalization of provider tracking callbacks.

pub mod dispatcher;
pub mod email;
pub mod sms;
pub mod tracking;

pub use dispatcher::ChannelDispatcher;
pub use email::EmailProvider;
pub use sms::SmsProvider;
