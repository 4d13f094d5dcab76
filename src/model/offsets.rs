use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single partition of a broker topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Offset to commit for a partition. By broker convention this is the next
/// offset to consume, not the last one consumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetAndMetadata {
    pub offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl OffsetAndMetadata {
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            metadata: None,
        }
    }
}

/// Offsets that become committable once a batch is durably written.
///
/// Equality and hashing are structural, which is what the acknowledgement set
/// relies on to match an acknowledgement against a queued batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionOffsets(BTreeMap<TopicPartition, OffsetAndMetadata>);

impl PartitionOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, partition: TopicPartition, offset: i64) -> Self {
        self.0.insert(partition, OffsetAndMetadata::new(offset));
        self
    }

    pub fn insert(&mut self, partition: TopicPartition, offset: OffsetAndMetadata) {
        self.0.insert(partition, offset);
    }

    pub fn get(&self, partition: &TopicPartition) -> Option<&OffsetAndMetadata> {
        self.0.get(partition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &OffsetAndMetadata)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PartitionOffsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (tp, om)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", tp, om.offset)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(TopicPartition, OffsetAndMetadata)> for PartitionOffsets {
    fn from_iter<I: IntoIterator<Item = (TopicPartition, OffsetAndMetadata)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
