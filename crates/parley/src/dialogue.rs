//! The dialogue: one order, its eventual response, and timing metadata.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Response stored on a dialogue whose reply never arrived.
pub const FAILURE_MARKER: &str = "failed waiting for a reply";

/// Receive time reported for a failed dialogue.
pub const FAILED_RECEIVE_SENTINEL: i64 = -1;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A submitted order and its outcome.
///
/// A dialogue is owned by exactly one party at a time: the submitting
/// thread, a queue, the worker that dequeued it, and finally the caller that
/// retrieved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialogue {
    address: String,
    order: String,
    response: String,
    sequence: u64,
    submitted: Timestamp,
    sent: Option<Timestamp>,
    received: Option<Timestamp>,
}

impl Dialogue {
    /// Creates a dialogue stamped with the current time as its submission time.
    #[must_use]
    pub fn new(address: impl Into<String>, order: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            order: order.into(),
            response: String::new(),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            submitted: Timestamp::now(),
            sent: None,
            received: None,
        }
    }

    /// Endpoint the order is addressed to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Request payload.
    #[must_use]
    pub fn order(&self) -> &str {
        &self.order
    }

    /// Reply payload, or [`FAILURE_MARKER`] once the dialogue failed.
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Process-unique submission sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time the dialogue was submitted.
    #[must_use]
    pub const fn time_submitted(&self) -> Timestamp {
        self.submitted
    }

    /// Time the order went out, once attempted.
    #[must_use]
    pub const fn time_sent(&self) -> Option<Timestamp> {
        self.sent
    }

    /// Time the reply arrived; `None` while pending or after a failure.
    #[must_use]
    pub const fn time_received(&self) -> Option<Timestamp> {
        self.received
    }

    /// Receive time in microseconds, or [`FAILED_RECEIVE_SENTINEL`].
    #[must_use]
    pub fn time_received_micros(&self) -> i64 {
        self.received
            .map_or(FAILED_RECEIVE_SENTINEL, Timestamp::as_micros)
    }

    /// True once the exchange was attempted and no reply was recorded.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.sent.is_some() && self.received.is_none()
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = Some(Timestamp::now().max(self.submitted));
    }

    pub(crate) fn complete(&mut self, reply: &[u8], received: Timestamp) {
        self.response = String::from_utf8_lossy(reply).into_owned();
        self.received = Some(received);
    }

    pub(crate) fn fail(&mut self) {
        if self.sent.is_none() {
            self.mark_sent();
        }
        FAILURE_MARKER.clone_into(&mut self.response);
        self.received = None;
    }

    /// Host-facing view of the dialogue.
    #[must_use]
    pub fn to_record(&self) -> DialogueRecord {
        DialogueRecord::from(self)
    }
}

/// Serialisable view of a dialogue as exposed by the command surface.
///
/// Timestamps are raw microseconds; a failed dialogue reports
/// [`FAILED_RECEIVE_SENTINEL`] as its receive time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueRecord {
    /// Request payload.
    pub order: String,
    /// Reply payload or failure marker.
    pub response: String,
    /// Submission time.
    pub time_submitted: i64,
    /// Send time, or the sentinel when the order never went out.
    pub time_sent: i64,
    /// Receive time, or the sentinel on failure.
    pub time_received: i64,
}

impl From<&Dialogue> for DialogueRecord {
    fn from(dialogue: &Dialogue) -> Self {
        Self {
            order: dialogue.order.clone(),
            response: dialogue.response.clone(),
            time_submitted: dialogue.submitted.as_micros(),
            time_sent: dialogue
                .sent
                .map_or(FAILED_RECEIVE_SENTINEL, Timestamp::as_micros),
            time_received: dialogue.time_received_micros(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_increase_with_submission_order() {
        let first = Dialogue::new("tcp://localhost:5555", "a");
        let second = Dialogue::new("tcp://localhost:5555", "b");
        assert!(second.sequence() > first.sequence());
        assert!(second.time_submitted() >= first.time_submitted());
    }

    #[test]
    fn failure_sets_marker_and_sentinel() {
        let mut dialogue = Dialogue::new("tcp://localhost:5555", "PING");
        dialogue.fail();

        assert!(dialogue.is_failed());
        assert_eq!(dialogue.response(), FAILURE_MARKER);
        assert_eq!(dialogue.time_received_micros(), FAILED_RECEIVE_SENTINEL);
        let sent = dialogue.time_sent().expect("failure stamps the send time");
        assert!(sent >= dialogue.time_submitted());
    }

    #[test]
    fn completion_copies_reply_lossily() {
        let mut dialogue = Dialogue::new("tcp://localhost:5555", "PING");
        dialogue.mark_sent();
        dialogue.complete(b"PO\xffNG", Timestamp::now());

        assert!(!dialogue.is_failed());
        assert_eq!(dialogue.response(), "PO\u{fffd}NG");
    }

    #[test]
    fn record_serialises_with_camel_case_fields() {
        let mut dialogue = Dialogue::new("tcp://localhost:5555", "PING");
        dialogue.fail();

        let json = serde_json::to_value(dialogue.to_record()).expect("serialise record");
        assert_eq!(json["order"], "PING");
        assert_eq!(json["response"], FAILURE_MARKER);
        assert_eq!(json["timeReceived"], -1);
        assert!(json["timeSubmitted"].as_i64().is_some());
    }
}
