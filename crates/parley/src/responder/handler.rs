//! Reply strategies for the server.

/// Produces the reply to one request frame.
///
/// Returning `None` sends nothing, leaving the client to time out.
pub trait ReplyHandler: Send + Sync {
    /// Reply to `request`.
    fn reply(&self, request: &[u8]) -> Option<Vec<u8>>;
}

impl<F> ReplyHandler for F
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    fn reply(&self, request: &[u8]) -> Option<Vec<u8>> {
        self(request)
    }
}

/// Replies with the request itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl ReplyHandler for EchoHandler {
    fn reply(&self, request: &[u8]) -> Option<Vec<u8>> {
        Some(request.to_vec())
    }
}

/// Replies with the same payload to every request.
#[derive(Debug, Clone)]
pub struct FixedReplyHandler {
    payload: Vec<u8>,
}

impl FixedReplyHandler {
    /// Replies with `payload`.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl ReplyHandler for FixedReplyHandler {
    fn reply(&self, _request: &[u8]) -> Option<Vec<u8>> {
        Some(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_handlers() {
        let handler = |request: &[u8]| (request == b"PING").then(|| b"PONG".to_vec());
        assert_eq!(handler.reply(b"PING"), Some(b"PONG".to_vec()));
        assert_eq!(handler.reply(b"other"), None);
    }

    #[test]
    fn fixed_reply_ignores_the_request() {
        let handler = FixedReplyHandler::new("ok");
        assert_eq!(handler.reply(b"anything"), Some(b"ok".to_vec()));
        assert_eq!(EchoHandler.reply(b"same"), Some(b"same".to_vec()));
    }
}
