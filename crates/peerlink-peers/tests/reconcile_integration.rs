#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for membership reconciliation.
//!
//! Tests the full flow: membership document → snapshot → reconciler →
//! tunnel server, with real token issuers and the polling file source.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use common::{Connection, FakeTunnel, URL_FORMAT};
use peerlink_peers::membership::parse_document;
use peerlink_peers::{
    FileMembershipSource, JwtTokenIssuer, PeerId, PeerStatus, ReconcileWorker, Reconciler,
    StaticTokenIssuer, TunnelServer,
};

const WAIT: Duration = Duration::from_secs(5);

fn endpoints(ips: &[&str]) -> String {
    let addresses: Vec<String> = ips.iter().map(|ip| format!(r#"{{"ip": "{ip}"}}"#)).collect();
    format!(
        r#"{{"metadata": {{"namespace": "cattle-system", "name": "cattle"}},
            "subsets": [{{"addresses": [{}]}}]}}"#,
        addresses.join(", ")
    )
}

fn static_reconciler(tunnel: &Arc<FakeTunnel>) -> Reconciler {
    Reconciler::new(
        URL_FORMAT,
        Arc::clone(tunnel) as Arc<dyn TunnelServer>,
        Arc::new(StaticTokenIssuer::new("peer-token")),
    )
}

#[tokio::test]
async fn endpoints_document_drives_connections() {
    let tunnel = Arc::new(FakeTunnel::default());
    let mut reconciler = static_reconciler(&tunnel);

    let doc = endpoints(&["192.0.0.1", "2001:db8::1", "192.0.", "10.0.0.1"]);
    let snapshot = parse_document(&doc, None).unwrap().unwrap();
    let report = reconciler.reconcile(&snapshot).await;

    assert_eq!(
        tunnel.connections(),
        vec![
            Connection {
                url: "ws://192.0.0.1/v3/connect".into(),
                id: "192.0.0.1".into(),
                token: "peer-token".into(),
            },
            Connection {
                url: "ws://[2001:db8::1]/v3/connect".into(),
                id: "2001:db8::1".into(),
                token: "peer-token".into(),
            },
            Connection {
                url: "ws://10.0.0.1/v3/connect".into(),
                id: "10.0.0.1".into(),
                token: "peer-token".into(),
            },
        ]
    );
    assert_eq!(report.skipped, vec!["192.0."]);
}

#[tokio::test]
async fn registry_tracks_membership_across_passes() {
    let tunnel = Arc::new(FakeTunnel::default());
    let mut reconciler = static_reconciler(&tunnel);

    let passes: [&[&str]; 4] = [
        &["10.0.0.1", "10.0.0.2"],
        &["10.0.0.2", "10.0.0.3"],
        &["10.0.0.3", "10.0.0.2"],
        &[],
    ];
    for members in passes {
        let snapshot = members.iter().copied().collect();
        reconciler.reconcile(&snapshot).await;

        let mut expected: Vec<&str> = members.to_vec();
        expected.sort_unstable();
        let registered: Vec<String> = reconciler
            .registry()
            .snapshot()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(registered, expected);

        let mut connected: Vec<String> = tunnel.connections().into_iter().map(|c| c.id).collect();
        connected.sort_unstable();
        assert_eq!(connected, expected);
    }
    let mut removed = tunnel.removed();
    removed.sort_unstable();
    assert_eq!(removed, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
}

#[tokio::test]
async fn jwt_tokens_are_bound_to_each_peer() {
    let tunnel = Arc::new(FakeTunnel::default());
    let issuer = Arc::new(JwtTokenIssuer::new(b"cluster-secret", Some("10.0.0.5".into()), 600));
    let mut reconciler = Reconciler::new(
        URL_FORMAT,
        Arc::clone(&tunnel) as Arc<dyn TunnelServer>,
        issuer.clone(),
    )
    .with_self_id(PeerId::new("10.0.0.5"));

    let snapshot = ["10.0.0.5", "10.0.0.6", "fd00::7"].into_iter().collect();
    reconciler.reconcile(&snapshot).await;

    let connections = tunnel.connections();
    assert_eq!(connections.len(), 2);
    for connection in connections {
        let claims = issuer.validate(&connection.token).unwrap();
        assert_eq!(claims.sub, connection.id);
        assert_eq!(claims.iss.as_deref(), Some("10.0.0.5"));
    }
    assert!(reconciler.status().ready);
}

#[tokio::test]
async fn file_source_and_worker_follow_document_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("endpoints.json");
    std::fs::write(&path, endpoints(&["10.0.0.1", "10.0.0.2"])).unwrap();

    let tunnel = Arc::new(FakeTunnel::default());
    let reconciler = static_reconciler(&tunnel);
    let mut status = reconciler.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let (_gone_tx, gone_rx) = mpsc::channel(8);

    let source = FileMembershipSource::new(path.clone(), Duration::from_millis(10))
        .with_filter("cattle-system/cattle".parse().unwrap());
    let source_handle = source.spawn(snapshot_tx, shutdown_rx.clone());
    let worker_handle = ReconcileWorker::new(reconciler).spawn(snapshot_rx, gone_rx, shutdown_rx);

    let has_peers = |expected: &'static [&'static str]| {
        move |s: &PeerStatus| s.peers.iter().map(PeerId::as_str).eq(expected.iter().copied())
    };
    tokio::time::timeout(WAIT, status.wait_for(has_peers(&["10.0.0.1", "10.0.0.2"])))
        .await
        .unwrap()
        .unwrap();

    // A broken write must not tear connections down.
    std::fs::write(&path, "{\"subsets\": [").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tunnel.connections().len(), 2);

    std::fs::write(&path, endpoints(&["10.0.0.2", "2001:db8::9"])).unwrap();
    tokio::time::timeout(WAIT, status.wait_for(has_peers(&["10.0.0.2", "2001:db8::9"])))
        .await
        .unwrap()
        .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, source_handle).await.unwrap().unwrap();
    let reconciler = tokio::time::timeout(WAIT, worker_handle).await.unwrap().unwrap();

    assert_eq!(reconciler.registry().len(), 2);
    assert_eq!(tunnel.removed(), vec!["10.0.0.1"]);
    assert!(
        tunnel
            .connections()
            .iter()
            .any(|c| c.url == "ws://[2001:db8::9]/v3/connect")
    );
}
