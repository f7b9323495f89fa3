pub mod bulk;
pub mod catalog;
pub mod health;
pub mod runs;
