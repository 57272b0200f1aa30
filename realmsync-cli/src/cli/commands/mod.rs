pub mod compare;
pub mod databases;
pub mod promote;
