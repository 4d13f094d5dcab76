pub mod batch;
pub mod offsets;
pub mod record;
pub mod status;

pub use batch::Batch;
pub use offsets::{OffsetAndMetadata, PartitionOffsets, TopicPartition};
pub use record::{Record, Value};
pub use status::{FailureCause, Status};
