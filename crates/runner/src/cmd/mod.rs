mod check;
mod run;

pub use check::{CheckArgs, run_check};
pub use run::{RunArgs, run_program};
