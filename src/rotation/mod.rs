pub mod selector;
pub mod store;
pub mod summary;
pub mod types;

pub use store::{Store, StoreError};
pub use types::Provider;
