mod client;
pub mod remote;

pub use client::{ForkSettings, RepoHandle, RepositoryClient};
pub use remote::{GitHubHost, RemoteHost, RemoteRepo};
