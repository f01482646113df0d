//! Messages exchanged between the producer feeds and the consumer.

use serde_json::Value;

/// Which feed produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// The buffered-event snapshot drain.
    Backfill,
    /// The live push subscription.
    Stream,
}

impl Source {
    /// Stable lowercase name, used in logs and counter keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Backfill => "backfill",
            Source::Stream => "stream",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event travelling through the bounded queue.
///
/// Created by a producer, owned by the queue until dequeued, then owned
/// by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Producing feed.
    pub source: Source,
    /// Event identifier used for duplicate suppression.
    pub event_id: String,
    /// The event document.
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names() {
        assert_eq!(Source::Backfill.as_str(), "backfill");
        assert_eq!(Source::Stream.to_string(), "stream");
    }
}
