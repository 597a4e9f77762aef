//! # Executable Capability Flows
//!
//! Callers in a workflow DON execute a capability hosted by every member of
//! a capability DON. The server runs the capability once `F + 1` callers
//! asked for the same request; each caller accepts a result once `F + 1`
//! servers agree on it.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::*;
    use capability_types::{Don, ErrorCode};
    use remote_capabilities::{ExecutableCapability, RemoteCapabilityError};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn recorders(n: usize) -> Vec<Arc<RecordingCapability>> {
        (0..n).map(|_| Arc::new(RecordingCapability::default())).collect()
    }

    #[tokio::test]
    async fn test_every_caller_reaches_quorum_with_f9_n10() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 10, 9);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let underlying = recorders(capability_don.n());
        let servers = start_servers(&network, &config, &capability_don, &workflow_don, |i| {
            underlying[i].clone()
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        let results = execute_all(&clients, request(json!({"amount": 10}))).await;

        assert_eq!(results.len(), 10);
        for result in results {
            assert_eq!(result.unwrap().value, json!({"amount": 10}));
        }
        for recorder in &underlying {
            assert_eq!(recorder.executions(), 1);
        }

        for client in &clients {
            client.close().await;
        }
        for server in &servers {
            server.close().await;
        }
        network.broker.close().await;
    }

    #[tokio::test]
    async fn test_every_caller_gets_timeout_with_f10_n10() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 10, 10);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);

        let underlying = recorders(capability_don.n());
        let _servers = start_servers(
            &network,
            &executable_config(Duration::from_millis(200)),
            &capability_don,
            &workflow_don,
            |i| underlying[i].clone(),
        );
        let clients = start_clients(
            &network,
            &executable_config(Duration::from_secs(10)),
            &capability_don,
            &workflow_don,
        );
        network.start();

        assert_all_timed_out(execute_all(&clients, request(json!({"amount": 10}))).await);
        for recorder in &underlying {
            assert_eq!(recorder.executions(), 0);
        }
    }

    fn assert_all_timed_out(results: Vec<remote_capabilities::Result<capability_types::CapabilityResponse>>) {
        assert_eq!(results.len(), 10);
        for result in results {
            match result {
                Err(RemoteCapabilityError::RemoteExecutionFailed { code, .. }) => {
                    assert_eq!(code, ErrorCode::Timeout)
                }
                other => panic!("expected TIMEOUT, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_config_reports_timeout_before_callers_expire() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 10, 10);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        // one config on both sides, server deadline derived from it
        let config = executable_config(Duration::from_millis(400));

        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |_| {
            Arc::new(RecordingCapability::default())
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        assert_all_timed_out(execute_all(&clients, request(json!({"amount": 10}))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_deadline_just_under_caller_deadline() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 10, 10);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let mut server_config = executable_config(Duration::from_secs(10));
        // closer to the caller deadline than one housekeeping tick
        server_config.server_request_timeout = Duration::from_millis(9_950);

        let _servers = start_servers(&network, &server_config, &capability_don, &workflow_don, |_| {
            Arc::new(RecordingCapability::default())
        });
        let clients = start_clients(
            &network,
            &executable_config(Duration::from_secs(10)),
            &capability_don,
            &workflow_don,
        );
        network.start();

        assert_all_timed_out(execute_all(&clients, request(json!({"amount": 10}))).await);
    }

    #[tokio::test]
    async fn test_unreachable_response_quorum_expires() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 10, 1);
        // clients believe the capability DON tolerates 11 faults out of 10
        let client_view = Don::new(capability_don.id, capability_don.members.clone(), 11);

        let _servers = start_servers(
            &network,
            &executable_config(Duration::from_secs(10)),
            &capability_don,
            &workflow_don,
            |_| Arc::new(RecordingCapability::default()),
        );
        let clients = start_clients(
            &network,
            &executable_config(Duration::from_millis(300)),
            &client_view,
            &workflow_don,
        );
        network.start();

        for result in execute_all(&clients, request(json!({"amount": 1}))).await {
            assert!(
                matches!(result, Err(RemoteCapabilityError::RequestExpired)),
                "{result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_cancel_before_quorum() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |_| {
            Arc::new(RecordingCapability::default())
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        // a single caller never reaches the server's F + 1 quorum
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let result = clients[0].execute(&cancel, request(json!({}))).await;

        assert!(matches!(
            result,
            Err(RemoteCapabilityError::ContextDoneBeforeResponseQuorum)
        ));
    }

    #[tokio::test]
    async fn test_excluded_attribute_merges_requests() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 3, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let mut config = executable_config(Duration::from_secs(10));
        config.request_hash_excluded_attributes = vec!["signed_at".to_string()];

        let underlying = recorders(capability_don.n());
        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |i| {
            underlying[i].clone()
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        let first = clients[0].clone();
        let second = clients[1].clone();
        let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
        let (a, b) = tokio::join!(
            first.execute(&cancel_a, request(json!({"amount": 10, "signed_at": 1000}))),
            second.execute(&cancel_b, request(json!({"amount": 10, "signed_at": 1003}))),
        );

        assert_eq!(a.unwrap().value["amount"], json!(10));
        assert_eq!(b.unwrap().value["amount"], json!(10));
        for recorder in &underlying {
            assert_eq!(recorder.executions(), 1);
        }
    }

    #[tokio::test]
    async fn test_underlying_failure_is_reported() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |_| {
            Arc::new(FailingCapability)
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        for result in execute_all(&clients, request(json!({}))).await {
            match result {
                Err(RemoteCapabilityError::RemoteExecutionFailed { code, msg }) => {
                    assert_eq!(code, ErrorCode::InternalError);
                    assert!(msg.contains("chain unavailable"), "{msg}");
                }
                other => panic!("expected INTERNAL_ERROR, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_faulty_member_is_outvoted() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |i| {
            let capability: Arc<dyn ExecutableCapability> = if i == 0 {
                Arc::new(LyingCapability)
            } else {
                Arc::new(RecordingCapability::default())
            };
            capability
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        for result in execute_all(&clients, request(json!({"amount": 7}))).await {
            assert_eq!(result.unwrap().value, json!({"amount": 7}));
        }
    }

    #[tokio::test]
    async fn test_staggered_sends_reach_quorum() {
        let network = TestNetwork::new();
        let workflow_don = don(WORKFLOW_DON_ID, 4, 1);
        let capability_don = don(CAPABILITY_DON_ID, 4, 1);
        let config = executable_config(Duration::from_secs(10));

        let underlying = recorders(capability_don.n());
        let _servers = start_servers(&network, &config, &capability_don, &workflow_don, |i| {
            underlying[i].clone()
        });
        let clients = start_clients(&network, &config, &capability_don, &workflow_don);
        network.start();

        let mut staggered = request(json!({"amount": 3}));
        staggered.config = json!({"schedule": "oneAtATime", "deltaStage": "20ms"});
        for result in execute_all(&clients, staggered).await {
            assert_eq!(result.unwrap().value, json!({"amount": 3}));
        }
        // the client accepts after F + 1 members answered, so the rest may
        // still be on their way
        assert!(underlying.iter().map(|r| r.executions()).sum::<usize>() >= 2);
    }
}
