pub mod command;
pub mod file;
pub mod guard;
pub mod manifest;
pub mod run_log;
pub mod system;
pub mod tools;
