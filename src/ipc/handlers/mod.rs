pub mod attendance;
pub mod classrooms;
pub mod core;
pub mod reports;
pub mod schools;
pub mod setup;
pub mod students;

mod shared;
