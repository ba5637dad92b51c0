pub mod auth;
pub mod core;
pub mod import;
pub mod payments;
pub mod schools;
pub mod students;
pub mod users;
pub mod vehicles;
