pub mod classify;
pub mod extract;
pub mod split;
pub mod tables;
pub mod today;
