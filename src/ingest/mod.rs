use thiserror::Error;

pub mod broker;
pub mod buffer;
pub mod normalize;
pub mod retention;

/// Payload shape published on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// temperature, humidity, co2 and time
    Climate,
    Tvoc,
    Ambient,
}

/// The three fixed uplink topics the service subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoutes {
    pub climate: String,
    pub tvoc: String,
    pub ambient: String,
}

impl TopicRoutes {
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.climate {
            Some(TopicKind::Climate)
        } else if topic == self.tvoc {
            Some(TopicKind::Tvoc)
        } else if topic == self.ambient {
            Some(TopicKind::Ambient)
        } else {
            None
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.climate, &self.tvoc, &self.ambient]
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("malformed timestamp {raw:?}: {reason}")]
    Timestamp { raw: String, reason: String },
}
