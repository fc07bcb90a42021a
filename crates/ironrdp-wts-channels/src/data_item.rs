use bytes::Bytes;

/// An owned, length-prefixed byte buffer tagged with a destination transport channel id.
///
/// This is the unit of work passed between producers (callers writing to a channel, or the
/// dispatcher delivering a reassembled inbound payload) and whichever side consumes the queue
/// it sits on. Ownership transfers on enqueue and on dequeue; there is exactly one owner at a
/// time.
#[derive(Debug, Clone)]
pub struct DataItem {
    pub channel_id: u16,
    pub payload: Bytes,
}

impl DataItem {
    pub fn new(channel_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel_id,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
