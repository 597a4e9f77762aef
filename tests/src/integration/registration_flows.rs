//! # Registration Flows
//!
//! Workflow members refresh their registrations periodically; a capability
//! member applies a registration once `2F + 1` of them agree and drops it
//! once they go quiet.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::*;
    use async_trait::async_trait;
    use capability_types::{
        from_payload, to_payload, MessageBody, Method, RegisterToWorkflowRequest,
        RegistrationMetadata,
    };
    use parking_lot::Mutex;
    use remote_capabilities::{
        ExecutableCapability, ManualTimeSource, Receiver, RegistrationClient, RegistrationKey,
        RegistrationServer, RegistrationTarget, Result,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn registration(workflow_id: &str) -> RegisterToWorkflowRequest {
        RegisterToWorkflowRequest {
            metadata: RegistrationMetadata {
                workflow_id: workflow_id.to_string(),
                reference_id: "write".to_string(),
                workflow_owner: "owner".to_string(),
            },
            config: json!({"gas_limit": 500_000}),
        }
    }

    #[tokio::test]
    async fn test_register_to_workflow_applies_once_per_server() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let underlying: Vec<Arc<RecordingCapability>> = (0..capability_don.n())
            .map(|_| Arc::new(RecordingCapability::default()))
            .collect();
        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |i| {
            underlying[i].clone()
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        for client in &clients {
            client.register_to_workflow(registration(WORKFLOW_A)).await.unwrap();
        }

        let all_registered = eventually(Duration::from_secs(2), || {
            underlying.iter().all(|r| r.registrations.lock().len() == 1)
        })
        .await;
        assert!(all_registered);

        // further refreshes keep it registered without repeating the side effect
        tokio::time::sleep(Duration::from_millis(100)).await;
        for recorder in &underlying {
            let registrations = recorder.registrations.lock();
            assert_eq!(registrations.len(), 1);
            assert_eq!(registrations[0], registration(WORKFLOW_A));
        }
    }

    #[tokio::test]
    async fn test_minority_registration_is_not_applied() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let underlying: Vec<Arc<RecordingCapability>> = (0..capability_don.n())
            .map(|_| Arc::new(RecordingCapability::default()))
            .collect();
        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |i| {
            underlying[i].clone()
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        // 2 of the 2F + 1 = 3 required members
        for client in &clients[..2] {
            client.register_to_workflow(registration(WORKFLOW_A)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        for recorder in &underlying {
            assert!(recorder.registrations.lock().is_empty());
        }
    }

    #[derive(Default)]
    struct CountingTarget {
        registered: AtomicUsize,
        unregistered: Mutex<Vec<RegistrationKey>>,
    }

    #[async_trait]
    impl RegistrationTarget for CountingTarget {
        async fn register(&self, _key: &RegistrationKey, _payload: &[u8]) -> Result<()> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unregister(&self, key: &RegistrationKey, _payload: &[u8]) -> Result<()> {
            self.unregistered.lock().push(key.clone());
            Ok(())
        }
    }

    /// Feeds `RegisterToWorkflow` messages into a standalone server.
    struct ServerReceiver {
        server: RegistrationServer,
    }

    #[async_trait]
    impl Receiver for ServerReceiver {
        async fn receive(&self, msg: MessageBody) {
            let Ok(sender) = msg.sender_peer_id() else {
                return;
            };
            let Ok(request) = from_payload::<RegisterToWorkflowRequest>(&msg.payload) else {
                return;
            };
            let _ = self
                .server
                .register(
                    &msg,
                    sender,
                    &request.metadata.workflow_id,
                    &request.metadata.reference_id,
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_registration_expires_once_refreshes_stop() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 1, 0);
        let clock = Arc::new(ManualTimeSource::new(1_000_000));
        let target = Arc::new(CountingTarget::default());
        let expiry = Duration::from_secs(10);

        let server = RegistrationServer::new(
            EXECUTABLE_ID,
            HashMap::from([(workflow_don.id, workflow_don.clone())]),
            target.clone(),
            expiry,
        )
        .with_time_source(clock.clone());
        let receiver = Arc::new(ServerReceiver { server });
        network
            .node(capability_don.members[0])
            .set_receiver(EXECUTABLE_ID, capability_don.id, receiver.clone())
            .unwrap();

        let clients: Vec<RegistrationClient> = workflow_don
            .members
            .iter()
            .map(|&peer| {
                let client = RegistrationClient::new(
                    network.node(peer),
                    EXECUTABLE_ID,
                    workflow_don.id,
                    capability_don.clone(),
                    Method::RegisterToWorkflow,
                    Duration::from_millis(20),
                );
                client.register_workflow(WORKFLOW_A, to_payload(&registration(WORKFLOW_A)).unwrap());
                client.start().unwrap();
                client
            })
            .collect();
        network.start();

        assert!(
            eventually(Duration::from_secs(2), || target.registered.load(Ordering::SeqCst) == 1)
                .await
        );
        assert_eq!(receiver.server.active_registrations().await, 1);

        // still fresh: nothing expires
        clock.advance(5_000);
        receiver.server.expire_registrations().await;
        assert!(target.unregistered.lock().is_empty());

        for client in &clients {
            client.close().await;
        }
        // let refreshes already queued at the broker land first
        tokio::time::sleep(Duration::from_millis(50)).await;
        clock.advance(20_000);
        receiver.server.expire_registrations().await;
        receiver.server.expire_registrations().await;

        let unregistered = target.unregistered.lock().clone();
        assert_eq!(unregistered.len(), 1);
        assert_eq!(unregistered[0].workflow_id, WORKFLOW_A);
        assert_eq!(unregistered[0].caller_don_id, workflow_don.id);
        assert_eq!(receiver.server.active_registrations().await, 0);
        assert_eq!(target.registered.load(Ordering::SeqCst), 1);
    }
}
