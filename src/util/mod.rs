//! Small async helpers shared by agents and capability clients.

pub mod timeout;

pub use timeout::{with_deadline, with_timeout};
