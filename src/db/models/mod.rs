//! Database models, one file per table.
//! Re-exported at `crate::db::models` so callers can `use crate::db::models::*;`.

pub mod donation;
pub mod notification;
pub mod user;

pub use self::donation::*;
pub use self::notification::*;
pub use self::user::*;
