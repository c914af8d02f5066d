//! Command handlers for each subcommand

pub mod balance;
pub mod fee;
pub mod run;

pub use balance::*;
pub use fee::*;
pub use run::*;
