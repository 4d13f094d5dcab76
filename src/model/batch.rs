use super::offsets::PartitionOffsets;
use super::record::Record;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// An immutable group of decoded records plus the offsets they represent.
///
/// The same batch sits in the work queue and the commit queue at once, so the
/// content lives behind an `Arc` and clones are cheap.
#[derive(Debug, Clone)]
pub struct Batch {
    inner: Arc<BatchInner>,
}

#[derive(Debug)]
struct BatchInner {
    id: Uuid,
    records: Vec<Record>,
    partition_offsets: PartitionOffsets,
    polled_at: Instant,
}

impl Batch {
    pub fn new(records: Vec<Record>, partition_offsets: PartitionOffsets) -> Self {
        Self::polled_at(records, partition_offsets, Instant::now())
    }

    pub fn polled_at(
        records: Vec<Record>,
        partition_offsets: PartitionOffsets,
        polled_at: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                id: Uuid::new_v4(),
                records,
                partition_offsets,
                polled_at,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn records(&self) -> &[Record] {
        &self.inner.records
    }

    pub fn partition_offsets(&self) -> &PartitionOffsets {
        &self.inner.partition_offsets
    }

    pub fn polled_at_instant(&self) -> Instant {
        self.inner.polled_at
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}

/// Two handles are equal when they refer to the same batch.
impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Batch {}
