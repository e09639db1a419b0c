pub mod defs;
pub mod error;

pub use defs::*;
pub use error::{DeliveryError, FeedError, StoreError};
