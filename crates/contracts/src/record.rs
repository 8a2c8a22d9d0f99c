//! Records and record batches as delivered by the transport

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{ChannelName, PhysicalTopic, Position};

/// One log entry on a physical topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Physical topic the record was read from
    pub topic: PhysicalTopic,

    /// Logical channel the record belongs to
    pub tag: ChannelName,

    /// Position of this record in the topic log
    pub position: Position,

    /// Opaque payload
    pub payload: Bytes,

    /// Producer timestamp (milliseconds since epoch)
    pub timestamp_ms: u64,
}

/// Ordered group of records covering `(begin, end]`
///
/// Records are sorted by position and every record satisfies
/// `begin < position <= end`. A batch may be empty and still advance the
/// covered range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    /// Physical topic
    pub topic: PhysicalTopic,

    /// Exclusive checkpoint this batch continues from
    pub begin: Position,

    /// Inclusive position this batch covers through
    pub end: Position,

    /// Records in log order
    pub records: Vec<Record>,
}

impl RecordBatch {
    /// Create an empty batch covering `(begin, end]`
    pub fn empty(topic: PhysicalTopic, begin: Position, end: Position) -> Self {
        Self {
            topic,
            begin,
            end,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `next` continues exactly where this batch ends
    pub fn is_followed_by(&self, next: &RecordBatch) -> bool {
        next.begin == self.end
    }
}
