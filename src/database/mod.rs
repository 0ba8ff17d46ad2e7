// Database module
// SQLite holds the relational metadata, flat index files hold the vectors

pub mod flat_index;
pub mod sqlite;

pub use flat_index::{FlatIndex, IndexAppend, IndexSearch, IndexStore, SearchHit};
pub use sqlite::*;
