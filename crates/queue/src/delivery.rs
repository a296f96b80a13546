//! A single message handed to the worker by the broker.

/// Broker-assigned handle used to settle a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery: raw payload plus settlement metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    /// How many times this message was returned to the queue before this delivery.
    pub redelivery_count: u32,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, payload: Vec<u8>) -> Self {
        Self {
            tag,
            payload,
            redelivery_count: 0,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.redelivery_count > 0
    }
}
