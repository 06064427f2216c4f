//! Lyra runtime server: kernel, scheduler, and the tool-call surface over
//! the evidence library.

pub mod api;
pub mod config;
pub mod doctor;
pub mod kernel;
pub mod server;

pub use config::Config;
pub use kernel::{Collaborators, RuntimeKernel, Scheduler};
pub use server::app::build_app;
