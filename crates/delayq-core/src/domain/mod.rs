//! Domain model: the work item, its encoding, keys, config and errors.

pub mod config;
pub mod errors;
pub mod item;
pub mod keys;

pub use self::config::QueueConfig;
pub use self::errors::QueueError;
pub use self::item::Item;
pub use self::keys::QueueKeys;
