//! Core types shared by the comparison engine and the promotion pipeline

mod entity;
mod sql;
mod value;

pub use entity::*;
pub use sql::*;
pub use value::*;
