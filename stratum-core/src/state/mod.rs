pub mod document;
pub mod graph;

pub use document::{ColorSpace, Document, ID as DocumentID};
