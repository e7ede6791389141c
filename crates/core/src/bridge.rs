//! Async request/response ports between contexts
//!
//! Each side owns an [`Inbox`]; peers hold cloneable [`Port`]s. A request
//! carries a oneshot reply slot. Dropping an [`Envelope`] without answering
//! is how a handler ignores a message; the requester then sees
//! [`DockError::NoResponse`].

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::errors::{DockError, Result};
use crate::messages::{Message, Reply, TabId};

/// One in-flight request
#[derive(Debug)]
pub struct Envelope<M> {
    pub message: M,
    /// Tab the request came from, `None` for the popup
    pub origin:  Option<TabId>,
    reply:       oneshot::Sender<Reply>,
}

impl<M> Envelope<M> {
    pub fn respond(self, reply: Reply) {
        Responder(self.reply).respond(reply);
    }

    /// Take the message out, keeping the reply slot for later
    pub fn into_parts(self) -> (M, Responder) {
        (self.message, Responder(self.reply))
    }
}

/// Reply slot detached from its [`Envelope`]
#[derive(Debug)]
pub struct Responder(oneshot::Sender<Reply>);

impl Responder {
    pub fn respond(self, reply: Reply) {
        // requester gave up waiting; nothing to do
        let _ = self.0.send(reply);
    }
}

/// Sending half; cheap to clone
#[derive(Debug)]
pub struct Port<M> {
    tx:     mpsc::UnboundedSender<Envelope<M>>,
    origin: Option<TabId>,
}

impl<M> Clone for Port<M> {
    fn clone(&self) -> Self {
        Port {
            tx:     self.tx.clone(),
            origin: self.origin,
        }
    }
}

impl<M: Message> Port<M> {
    /// A port whose requests are stamped as coming from `tab`
    pub fn for_tab(&self, tab: TabId) -> Self {
        Port {
            tx:     self.tx.clone(),
            origin: Some(tab),
        }
    }

    /// Send and wait for the raw reply envelope
    pub async fn send(&self, message: M) -> Result<Reply> {
        let kind = message.kind();
        let (reply, response) = oneshot::channel();

        self.tx
            .send(Envelope {
                message,
                origin: self.origin,
                reply,
            })
            .map_err(|_| DockError::Transport(format!("Receiver for '{}' is gone", kind)))?;

        response
            .await
            .map_err(|_| DockError::NoResponse(kind.to_string()))
    }

    /// Send and unwrap the envelope into a result
    pub async fn request(&self, message: M) -> Result<Value> {
        self.send(message).await?.into_result()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half
#[derive(Debug)]
pub struct Inbox<M> {
    rx: mpsc::UnboundedReceiver<Envelope<M>>,
}

impl<M> Inbox<M> {
    pub async fn recv(&mut self) -> Option<Envelope<M>> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

pub fn channel<M>() -> (Port<M>, Inbox<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Port { tx, origin: None }, Inbox { rx })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::BackgroundRequest;

    #[tokio::test]
    async fn test_request_roundtrip_with_origin() {
        let (port, mut inbox) = channel::<BackgroundRequest>();
        let port = port.for_tab(7);

        let (result, _) = tokio::join!(port.request(BackgroundRequest::GetPrompts), async {
            let envelope = inbox.recv().await.unwrap();
            assert_eq!(envelope.origin, Some(7));
            assert_eq!(envelope.message, BackgroundRequest::GetPrompts);
            envelope.respond(Reply::success(json!([])));
        });

        assert_eq!(result.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_dropped_envelope_is_no_response() {
        let (port, mut inbox) = channel::<BackgroundRequest>();

        let (result, _) = tokio::join!(port.send(BackgroundRequest::GetStats), async {
            drop(inbox.recv().await.unwrap());
        });

        match result {
            Err(DockError::NoResponse(kind)) => assert_eq!(kind, "contextDock.getStats"),
            other => panic!("Expected NoResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_inbox_is_transport_error() {
        let (port, inbox) = channel::<BackgroundRequest>();
        drop(inbox);

        assert!(port.is_closed());
        let result = port.send(BackgroundRequest::GetPrompts).await;
        assert!(matches!(result, Err(DockError::Transport(_))));
    }

    #[tokio::test]
    async fn test_failure_reply_becomes_error() {
        let (port, mut inbox) = channel::<BackgroundRequest>();

        let (result, _) = tokio::join!(
            port.request(BackgroundRequest::DeletePrompt { id: "x".into() }),
            async {
                let envelope = inbox.recv().await.unwrap();
                envelope.respond(Reply::failure(&DockError::NotFound("x".into())));
            }
        );

        assert!(result.unwrap_err().to_string().contains("not found"));
    }
}
