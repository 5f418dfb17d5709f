pub mod retry;

pub use retry::{DeliveryMode, RetryConfig, RetryPolicy};
