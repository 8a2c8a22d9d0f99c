//! Logical subscription → physical topic naming
//!
//! The transformation itself belongs to the surrounding platform; dispatchers
//! only need it to be pure and deterministic.

use crate::{ChannelName, PhysicalTopic};

/// Derives the physical topic a logical channel is multiplexed onto
pub trait TopicNaming: Send + Sync {
    fn physical_topic(&self, channel: &ChannelName) -> PhysicalTopic;
}

/// Default naming: the physical topic is the channel name without its final
/// `_`-delimited segment.
///
/// ```
/// use contracts::{SuffixNaming, TopicNaming};
///
/// let naming = SuffixNaming;
/// assert_eq!(naming.physical_topic(&"dml_0_441v0".into()), "dml_0");
/// assert_eq!(naming.physical_topic(&"p0".into()), "p0");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixNaming;

impl TopicNaming for SuffixNaming {
    fn physical_topic(&self, channel: &ChannelName) -> PhysicalTopic {
        match channel.rfind('_') {
            Some(idx) => PhysicalTopic::new(&channel[..idx]),
            None => PhysicalTopic::new(channel),
        }
    }
}

impl<F> TopicNaming for F
where
    F: Fn(&ChannelName) -> PhysicalTopic + Send + Sync,
{
    fn physical_topic(&self, channel: &ChannelName) -> PhysicalTopic {
        self(channel)
    }
}
