//! Record domain - the document entity served by the CLI

mod entity;

pub use entity::{Record, RecordId};
