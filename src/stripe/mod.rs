pub mod client;
pub mod event;
pub mod signature;

pub use client::{CheckoutSession, CheckoutSessionLookup, StripeClient};
pub use event::{CartLine, CheckoutContext, EventType, PaymentEvent};
