//! Signer host: answers bridge requests on behalf of a [`SigningAuthority`].

use std::net::SocketAddr;
use std::sync::Arc;

use devnet_bridge::message::ACTION_HASH_FIELD;
use devnet_bridge::{BridgeError, Envelope, Link, MessageKind, Outbox, Router, transport};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::account::{AuthorityError, SigningAuthority};
use crate::types::{Call, DeclarePayload, ExecuteOptions, SignOptions};

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    transactions: Vec<Call>,
    #[serde(default)]
    options: ExecuteOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    typed_data: Value,
    #[serde(default)]
    options: SignOptions,
}

/// Privileged side of the bridge.
///
/// Declares are acknowledged immediately with a fresh `actionHash`; the
/// outcome follows once the authority returns.
pub struct SignerHost {
    authority: Arc<dyn SigningAuthority>,
}

impl SignerHost {
    pub fn new(authority: Arc<dyn SigningAuthority>) -> Self {
        Self { authority }
    }

    /// A router with handlers for every request kind.
    pub fn router(&self) -> Router {
        let mut router = Router::new();

        let authority = Arc::clone(&self.authority);
        router.register(
            MessageKind::RequestExecute,
            Arc::new(move |envelope: Envelope, outbox: Outbox| {
                let authority = Arc::clone(&authority);
                Box::pin(async move { handle_execute(authority, envelope, outbox).await })
            }),
        );

        let authority = Arc::clone(&self.authority);
        router.register(
            MessageKind::RequestDeclare,
            Arc::new(move |envelope: Envelope, outbox: Outbox| {
                let authority = Arc::clone(&authority);
                Box::pin(async move { handle_declare(authority, envelope, outbox).await })
            }),
        );

        let authority = Arc::clone(&self.authority);
        router.register(
            MessageKind::RequestSign,
            Arc::new(move |envelope: Envelope, outbox: Outbox| {
                let authority = Arc::clone(&authority);
                Box::pin(async move { handle_sign(authority, envelope, outbox).await })
            }),
        );

        router
    }

    /// Serve one link until the peer goes away.
    pub async fn serve(&self, link: Link) {
        self.router().serve(link).await;
    }

    /// Accept WebSocket connections on `addr` and serve each one. Returns the
    /// bound address.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, BridgeError> {
        let (local_addr, mut links) = transport::listen(addr).await?;
        let router = Arc::new(self.router());
        tokio::spawn(async move {
            while let Some(link) = links.recv().await {
                let router = Arc::clone(&router);
                tokio::spawn(async move { router.serve(link).await });
            }
        });
        info!("Signer host ready on {local_addr}");
        Ok(local_addr)
    }
}

async fn handle_execute(authority: Arc<dyn SigningAuthority>, envelope: Envelope, outbox: Outbox) {
    let reply = match serde_json::from_value::<ExecuteRequest>(envelope.payload) {
        Ok(request) => match authority
            .execute(&request.transactions, &request.options)
            .await
        {
            Ok(result) => json!({"transactionHash": result.transaction_hash}),
            Err(e) => {
                debug!("execute refused: {e}");
                e.to_payload()
            }
        },
        Err(e) => {
            warn!("Malformed execute request: {e}");
            AuthorityError::Failed(format!("malformed request: {e}")).to_payload()
        }
    };
    outbox.post(Envelope::new(MessageKind::ReplyExecute, reply));
}

async fn handle_declare(authority: Arc<dyn SigningAuthority>, envelope: Envelope, outbox: Outbox) {
    let action_hash = uuid::Uuid::new_v4().to_string();
    outbox.post(Envelope::new(
        MessageKind::AckDeclare,
        json!({ ACTION_HASH_FIELD: action_hash }),
    ));

    let result = match serde_json::from_value::<DeclarePayload>(envelope.payload) {
        Ok(payload) => authority.declare(&payload).await,
        Err(e) => Err(AuthorityError::Failed(format!("malformed request: {e}"))),
    };
    match result {
        Ok(declared) => outbox.post(Envelope::new(
            MessageKind::ReplyDeclareOk,
            json!({
                ACTION_HASH_FIELD: action_hash,
                "transactionHash": declared.transaction_hash.map(|h| h.to_string()).unwrap_or_default(),
                "classHash": declared.class_hash,
            }),
        )),
        Err(e) => {
            debug!(%action_hash, "declare failed: {e}");
            let mut reply = e.to_payload();
            reply[ACTION_HASH_FIELD] = Value::String(action_hash);
            outbox.post(Envelope::new(MessageKind::ReplyDeclareFailed, reply));
        }
    }
}

async fn handle_sign(authority: Arc<dyn SigningAuthority>, envelope: Envelope, outbox: Outbox) {
    let result = match serde_json::from_value::<SignRequest>(envelope.payload) {
        Ok(request) => {
            authority
                .sign_message(&request.typed_data, &request.options)
                .await
        }
        Err(e) => Err(AuthorityError::Failed(format!("malformed request: {e}"))),
    };
    let reply = match result {
        Ok(signature) => Envelope::new(MessageKind::ReplySignOk, json!({"signature": signature})),
        Err(e) => Envelope::new(MessageKind::ReplySignFailed, e.to_payload()),
    };
    outbox.post(reply);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeclareResult, ExecuteResult, Felt, Signature};
    use async_trait::async_trait;
    use devnet_bridge::link_pair;

    struct Fixed;

    #[async_trait]
    impl SigningAuthority for Fixed {
        fn address(&self) -> Felt {
            Felt::from(1u64)
        }

        async fn execute(
            &self,
            calls: &[Call],
            _options: &ExecuteOptions,
        ) -> Result<ExecuteResult, AuthorityError> {
            if calls.is_empty() {
                return Err(AuthorityError::Rejected("nothing to do".into()));
            }
            Ok(ExecuteResult {
                transaction_hash: Felt::from(0x77u64),
            })
        }

        async fn declare(&self, _payload: &DeclarePayload) -> Result<DeclareResult, AuthorityError> {
            Ok(DeclareResult::already_declared(Felt::from(5u64)))
        }

        async fn sign_message(
            &self,
            _typed_data: &Value,
            _options: &SignOptions,
        ) -> Result<Signature, AuthorityError> {
            Err(AuthorityError::Rejected("declined".into()))
        }
    }

    fn serve() -> Link {
        let (page, signer) = link_pair();
        let host = SignerHost::new(Arc::new(Fixed));
        tokio::spawn(async move { host.serve(signer).await });
        page
    }

    #[test]
    fn router_handles_every_request_kind() {
        let router = SignerHost::new(Arc::new(Fixed)).router();
        for kind in MessageKind::ALL.iter().filter(|k| k.is_request()) {
            assert!(router.has_handler(*kind), "{kind}");
        }
        assert_eq!(router.handler_count(), 3);
    }

    #[tokio::test]
    async fn execute_reply_carries_hash_or_error() {
        let mut page = serve();
        let call = Call::new(Felt::from(2u64), "increase", vec![]);
        page.outbox.post(Envelope::new(
            MessageKind::RequestExecute,
            json!({"transactions": [call]}),
        ));
        let reply = page.inbox.recv().await.unwrap();
        assert_eq!(reply.kind, MessageKind::ReplyExecute);
        assert_eq!(reply.payload["transactionHash"], "0x77");

        page.outbox.post(Envelope::new(
            MessageKind::RequestExecute,
            json!({"transactions": []}),
        ));
        let reply = page.inbox.recv().await.unwrap();
        assert_eq!(reply.payload["error"], "nothing to do");
        assert_eq!(reply.payload["reason"], "rejected");
    }

    #[tokio::test]
    async fn declare_is_acked_then_answered_with_same_token() {
        let mut page = serve();
        page.outbox.post(Envelope::new(
            MessageKind::RequestDeclare,
            json!({"contract": {}, "casm": {}}),
        ));

        let ack = page.inbox.recv().await.unwrap();
        assert_eq!(ack.kind, MessageKind::AckDeclare);
        let token = ack.correlation_token().unwrap().to_string();

        let outcome = page.inbox.recv().await.unwrap();
        assert_eq!(outcome.kind, MessageKind::ReplyDeclareOk);
        assert_eq!(outcome.correlation_token(), Some(token.as_str()));
        assert_eq!(outcome.payload["transactionHash"], "");
        assert_eq!(outcome.payload["classHash"], "0x5");
    }

    #[tokio::test]
    async fn malformed_declare_still_acks_then_fails() {
        let mut page = serve();
        page.outbox
            .post(Envelope::new(MessageKind::RequestDeclare, json!({"bogus": 1})));

        assert_eq!(page.inbox.recv().await.unwrap().kind, MessageKind::AckDeclare);
        let outcome = page.inbox.recv().await.unwrap();
        assert_eq!(outcome.kind, MessageKind::ReplyDeclareFailed);
        assert!(
            outcome.payload["error"]
                .as_str()
                .unwrap()
                .contains("malformed request")
        );
        assert_eq!(outcome.payload["reason"], "failed");
    }

    #[tokio::test]
    async fn rejected_sign_replies_failed() {
        let mut page = serve();
        page.outbox.post(Envelope::new(
            MessageKind::RequestSign,
            json!({"typedData": {"message": {}}}),
        ));
        let reply = page.inbox.recv().await.unwrap();
        assert_eq!(reply.kind, MessageKind::ReplySignFailed);
        assert_eq!(reply.payload["error"], "declined");
        assert_eq!(reply.payload["reason"], "rejected");
    }
}
