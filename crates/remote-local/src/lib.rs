mod backend;
mod capture;
mod command;
mod prerequisites;
mod process;

pub use backend::LocalBackend;
pub use prerequisites::check_prerequisites;
