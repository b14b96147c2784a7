//! 用户资料模块

pub mod dao;
pub mod models;

pub use dao::{ProfileDirectory, SqliteProfileDirectory, UNKNOWN_USER};
pub use models::{Profile, Role};
