mod collections;
mod config;
mod index;
mod search;
mod status;

pub use collections::{CollectionsCommand, DocumentsArgs};
pub use config::ConfigCommand;
pub use index::IndexCommand;
pub use search::SearchArgs;

pub use collections::{handle_collections, handle_documents};
pub use config::handle_config;
pub use index::handle_index;
pub use search::handle_search;
pub use status::handle_status;
