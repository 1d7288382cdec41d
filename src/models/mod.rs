mod collection;
pub mod record;
mod snapshot;

pub use collection::{Collection, NodeMode};
pub use record::Record;
pub use snapshot::Snapshot;
