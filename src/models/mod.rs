pub mod command;

pub use command::{Command, CommandStatus, CommandUpdate, NewCommand, RepoRef, RunStatus, next_step};
