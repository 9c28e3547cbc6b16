// Adapters layer: concrete ModelStore implementations and price list readers.

pub mod catalog_csv;
pub mod json_store;
pub mod memory;

pub use catalog_csv::{read_price_list, read_price_list_file};
pub use json_store::JsonFileStore;
pub use memory::MemoryStore;
