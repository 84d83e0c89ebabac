#[cfg(test)]
mod memory;
mod sqlite;

#[cfg(test)]
pub use memory::MemoryKnowledgeStore;
pub use sqlite::SqliteKnowledgeStore;
