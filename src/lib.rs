//! Planetary industry scouting: rank planets and systems by the value of the
//! best P1 material they can produce.

pub mod app;
pub mod cli_args;
pub mod domain;
pub mod infra;
pub mod util;
