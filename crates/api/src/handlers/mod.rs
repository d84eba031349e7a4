pub mod backends;
pub mod tasks;
