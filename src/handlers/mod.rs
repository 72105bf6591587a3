//! Handler modules

pub mod api;
pub mod connection;
pub mod room;

pub use api::*;
pub use connection::*;
pub use room::*;
