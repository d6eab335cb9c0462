//! The relay server (§4.E): the hub agents connect to when they cannot
//! maintain a direct connection to each other. Routes envelopes, tracks
//! presence, buffers messages for designated storage peers while they
//! are offline, and answers the signed peer directory.

pub mod agent;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use agent::AgentRecord;
pub use error::RelayError;
pub use protocol::{ClientFrame, PeerInfo, RelayFrame, StoredPeerInfo};
pub use server::{Relay, RelayConfig};
pub use store::{Store, StoreError, StoredEntry};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use agora_crypto::Keypair;
    use agora_envelope::Envelope;
    use agora_types::MessageType;
    use axum::Router;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as TsMessage;

    async fn spawn_relay(config: RelayConfig) -> (std::net::SocketAddr, std::sync::Arc<Relay>) {
        let relay = Relay::new(config);
        let router: Router = relay.router("/ws");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, relay)
    }

    async fn connect(
        addr: std::net::SocketAddr,
    ) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>
    {
        let url = format!("ws://{addr}/ws");
        let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        stream
    }

    async fn send_frame(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        frame: &ClientFrame,
    ) {
        let text = serde_json::to_string(frame).unwrap();
        ws.send(TsMessage::Text(text.into())).await.unwrap();
    }

    async fn recv_frame(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> RelayFrame {
        loop {
            match ws.next().await.unwrap().unwrap() {
                TsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    fn publish_envelope(kp: &Keypair) -> Envelope {
        agora_envelope::create(
            MessageType::Publish,
            &kp.public_hex(),
            &kp.private_hex(),
            serde_json::json!({"text": "hi"}),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn two_registered_agents_exchange_a_direct_message_s2() {
        let (addr, _relay) = spawn_relay(RelayConfig::default()).await;
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let mut alice_ws = connect(addr).await;
        send_frame(
            &mut alice_ws,
            &ClientFrame::Register {
                public_key: alice.public_hex(),
                name: Some("alice".to_string()),
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut alice_ws).await,
            RelayFrame::Registered { .. }
        ));

        let mut bob_ws = connect(addr).await;
        send_frame(
            &mut bob_ws,
            &ClientFrame::Register {
                public_key: bob.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut bob_ws).await,
            RelayFrame::Registered { .. }
        ));
        // Alice sees Bob come online.
        assert!(matches!(
            recv_frame(&mut alice_ws).await,
            RelayFrame::PeerOnline { .. }
        ));

        let envelope = publish_envelope(&alice);
        send_frame(
            &mut alice_ws,
            &ClientFrame::Message {
                to: bob.public_hex(),
                envelope: envelope.clone(),
            },
        )
        .await;

        let received = recv_frame(&mut bob_ws).await;
        match received {
            RelayFrame::Message { from, name, envelope: got } => {
                assert_eq!(from, alice.public_hex());
                assert_eq!(name.as_deref(), Some("alice"));
                assert_eq!(got.id, envelope.id);
            }
            other => panic!("expected a message frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_to_an_unreachable_non_storage_peer_errors_s3() {
        let (addr, _relay) = spawn_relay(RelayConfig::default()).await;
        let alice = Keypair::generate();
        let ghost = Keypair::generate();

        let mut alice_ws = connect(addr).await;
        send_frame(
            &mut alice_ws,
            &ClientFrame::Register {
                public_key: alice.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut alice_ws).await,
            RelayFrame::Registered { .. }
        ));

        send_frame(
            &mut alice_ws,
            &ClientFrame::Message {
                to: ghost.public_hex(),
                envelope: publish_envelope(&alice),
            },
        )
        .await;

        let frame = recv_frame(&mut alice_ws).await;
        assert!(matches!(frame, RelayFrame::Error { .. }));
    }

    #[tokio::test]
    async fn message_to_an_offline_storage_peer_is_buffered_and_delivered_on_register_s4() {
        let dir = tempfile::tempdir().unwrap();
        let storage_agent = Keypair::generate();
        let mut storage_peers = std::collections::HashSet::new();
        storage_peers.insert(storage_agent.public_hex());
        let config = RelayConfig {
            storage_peers,
            store_root: Some(dir.path().to_path_buf()),
            identity: None,
        };
        let (addr, _relay) = spawn_relay(config).await;

        let alice = Keypair::generate();
        let mut alice_ws = connect(addr).await;
        send_frame(
            &mut alice_ws,
            &ClientFrame::Register {
                public_key: alice.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut alice_ws).await,
            RelayFrame::Registered { .. }
        ));

        let envelope = publish_envelope(&alice);
        send_frame(
            &mut alice_ws,
            &ClientFrame::Message {
                to: storage_agent.public_hex(),
                envelope: envelope.clone(),
            },
        )
        .await;

        let mut storage_ws = connect(addr).await;
        send_frame(
            &mut storage_ws,
            &ClientFrame::Register {
                public_key: storage_agent.public_hex(),
                name: None,
            },
        )
        .await;
        // First the registered ack, then the buffered message — delivered
        // before any further frame could reach this connection.
        assert!(matches!(
            recv_frame(&mut storage_ws).await,
            RelayFrame::Registered { .. }
        ));
        let delivered = recv_frame(&mut storage_ws).await;
        match delivered {
            RelayFrame::Message { from, envelope: got, .. } => {
                assert_eq!(from, alice.public_hex());
                assert_eq!(got.id, envelope.id);
            }
            other => panic!("expected the buffered message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_write_wins_registration_closes_the_prior_connection() {
        let (addr, _relay) = spawn_relay(RelayConfig::default()).await;
        let alice = Keypair::generate();

        let mut first = connect(addr).await;
        send_frame(
            &mut first,
            &ClientFrame::Register {
                public_key: alice.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut first).await,
            RelayFrame::Registered { .. }
        ));

        let mut second = connect(addr).await;
        send_frame(
            &mut second,
            &ClientFrame::Register {
                public_key: alice.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut second).await,
            RelayFrame::Registered { .. }
        ));

        // The first connection must now be closed by the relay.
        let closed = tokio::time::timeout(std::time::Duration::from_secs(2), first.next()).await;
        match closed {
            Ok(Some(Ok(TsMessage::Close(_)))) | Ok(None) => {}
            Ok(Some(Ok(other))) => panic!("expected the old connection to close, got {other:?}"),
            Ok(Some(Err(_))) => {}
            Err(_) => panic!("old connection was not closed within the timeout"),
        }
    }

    #[tokio::test]
    async fn signed_peer_list_request_is_answered_by_the_relay_identity_s5() {
        let identity = Keypair::generate();
        let config = RelayConfig {
            storage_peers: std::collections::HashSet::new(),
            store_root: None,
            identity: Some(Keypair::import(&identity.public_hex(), &identity.private_hex()).unwrap()),
        };
        let (addr, _relay) = spawn_relay(config).await;

        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mut alice_ws = connect(addr).await;
        send_frame(
            &mut alice_ws,
            &ClientFrame::Register {
                public_key: alice.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut alice_ws).await,
            RelayFrame::Registered { .. }
        ));

        let mut bob_ws = connect(addr).await;
        send_frame(
            &mut bob_ws,
            &ClientFrame::Register {
                public_key: bob.public_hex(),
                name: None,
            },
        )
        .await;
        assert!(matches!(
            recv_frame(&mut bob_ws).await,
            RelayFrame::Registered { .. }
        ));
        assert!(matches!(
            recv_frame(&mut alice_ws).await,
            RelayFrame::PeerOnline { .. }
        ));

        let request = agora_envelope::create(
            MessageType::PeerListRequest,
            &alice.public_hex(),
            &alice.private_hex(),
            serde_json::json!({}),
            None,
        )
        .unwrap();
        send_frame(
            &mut alice_ws,
            &ClientFrame::Message {
                to: identity.public_hex(),
                envelope: request,
            },
        )
        .await;

        let response = recv_frame(&mut alice_ws).await;
        match response {
            RelayFrame::Message { from, envelope, .. } => {
                assert_eq!(from, identity.public_hex());
                assert_eq!(agora_envelope::verify(&envelope), Ok(()));
                let payload: directory::PeerListResponsePayload =
                    serde_json::from_value(envelope.payload).unwrap();
                assert_eq!(payload.total_peers, 1);
                assert_eq!(payload.peers[0].public_key, bob.public_hex());
            }
            other => panic!("expected the directory response, got {other:?}"),
        }
    }
}
