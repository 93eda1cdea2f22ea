pub mod candidate;
pub mod config;
pub mod lead;
pub mod query;
pub mod run;
