pub mod console;
pub mod discord;

pub use console::ConsoleDestination;
pub use discord::{DiscordConfig, DiscordDestination};
