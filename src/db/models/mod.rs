//! Row types and read-side queries, one module per table family.

pub mod common;
pub mod contact;
pub mod event;
pub mod quote;
pub mod report;
pub mod session;
pub mod user;

pub use common::*;
pub use contact::*;
pub use event::*;
pub use quote::*;
pub use report::*;
pub use session::*;
pub use user::*;
