pub mod cli;
pub mod config;
pub mod error;
pub mod hooks;
pub mod linker;
pub mod reader;
pub mod store;
pub mod telemetry;
pub mod util;

pub use config::Config;
pub use error::TetherError;
pub use reader::{ConversationReader, ReaderRegistry};
pub use store::LinkStore;
