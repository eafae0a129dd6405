//! Request router: dispatches inbound requests to registered handlers on the
//! privileged side of the bridge.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::link::{Link, Outbox};
use crate::message::{Envelope, MessageKind};

/// A handler function that processes a request. Replies are posted through
/// the given [`Outbox`]; a handler may post any number of them (an
/// acknowledgement followed by an outcome, for example).
pub type MessageHandler =
    Arc<dyn Fn(Envelope, Outbox) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Routes incoming envelopes to the appropriate handler based on their
/// [`MessageKind`].
#[derive(Default)]
pub struct Router {
    handlers: HashMap<MessageKind, MessageHandler>,
}

impl Router {
    /// Create a new router with no handlers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific message kind.
    pub fn register(&mut self, kind: MessageKind, handler: MessageHandler) {
        debug!("Registering handler for message kind: {kind}");
        self.handlers.insert(kind, handler);
    }

    /// Check if a handler is registered for a specific message kind.
    pub fn has_handler(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Return the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an envelope to its handler. Returns `false` if nothing handles
    /// this kind.
    pub async fn dispatch(&self, envelope: Envelope, outbox: &Outbox) -> bool {
        let kind = envelope.kind;
        match self.handlers.get(&kind) {
            Some(handler) => {
                debug!("Dispatching {kind} envelope {}", envelope.id);
                handler(envelope, outbox.clone()).await;
                true
            }
            None => {
                warn!("No handler for message kind: {kind}");
                false
            }
        }
    }

    /// Serve requests arriving on `link` until the peer disconnects.
    ///
    /// Requests are handled one at a time, in arrival order.
    pub async fn serve(&self, link: Link) {
        let Link { outbox, mut inbox } = link;
        while let Some(envelope) = inbox.recv().await {
            self.dispatch(envelope, &outbox).await;
        }
        info!("Router link closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link_pair;

    fn echo(reply: MessageKind) -> MessageHandler {
        Arc::new(move |env: Envelope, outbox: Outbox| {
            Box::pin(async move {
                outbox.post(Envelope::new(reply, env.payload));
            })
        })
    }

    #[tokio::test]
    async fn test_register_and_dispatch() {
        let mut router = Router::new();
        router.register(MessageKind::RequestExecute, echo(MessageKind::ReplyExecute));
        assert!(router.has_handler(MessageKind::RequestExecute));
        assert_eq!(router.handler_count(), 1);

        let (ours, mut theirs) = link_pair();
        let handled = router
            .dispatch(
                Envelope::new(MessageKind::RequestExecute, serde_json::json!({"n": 1})),
                &ours.outbox,
            )
            .await;
        assert!(handled);

        let response = theirs.inbox.recv().await.unwrap();
        assert_eq!(response.kind, MessageKind::ReplyExecute);
        assert_eq!(response.payload["n"], 1);
    }

    #[tokio::test]
    async fn test_unhandled_message() {
        let router = Router::new();
        let (ours, _theirs) = link_pair();
        let handled = router
            .dispatch(
                Envelope::new(MessageKind::RequestSign, serde_json::json!({})),
                &ours.outbox,
            )
            .await;
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_handler_may_post_several_replies() {
        let mut router = Router::new();
        router.register(
            MessageKind::RequestDeclare,
            Arc::new(|_env, outbox: Outbox| {
                Box::pin(async move {
                    outbox.post(Envelope::new(
                        MessageKind::AckDeclare,
                        serde_json::json!({"actionHash": "a"}),
                    ));
                    outbox.post(Envelope::new(
                        MessageKind::ReplyDeclareOk,
                        serde_json::json!({"actionHash": "a"}),
                    ));
                })
            }),
        );

        let (page, signer) = link_pair();
        let server = tokio::spawn(async move { router.serve(signer).await });

        let Link { outbox, mut inbox } = page;
        outbox.post(Envelope::new(MessageKind::RequestDeclare, serde_json::json!({})));
        assert_eq!(inbox.recv().await.unwrap().kind, MessageKind::AckDeclare);
        assert_eq!(inbox.recv().await.unwrap().kind, MessageKind::ReplyDeclareOk);

        drop(outbox);
        server.await.unwrap();
    }
}
