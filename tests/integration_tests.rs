//! Integration tests for the session core, driven against the in-memory
//! `Gateway`/`Keyring` test doubles rather than a real UDP socket.
//!
//! Each test wires up two independent `MemoryGateway`s standing in for two
//! peers and manually relays the datagrams each side's transport shim
//! produces, the same way `demos/session_demo.rs` does for a full
//! successful handshake. Timing-sensitive scenarios (fan-out, heartbeat
//! loss) shrink the relevant `SessionTimeouts` fields so the test converges
//! in milliseconds instead of the production 10s/30s windows.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sequoia_openpgp::cert::CertBuilder;
use sequoia_openpgp::serialize::Serialize as _;
use sequoia_openpgp::Cert;

use tunnel_session::{
    Credentials, Gateway, MemoryGateway, MemoryKeyring, Session, SessionDeps, SessionTimeouts,
    VerificationPolicy,
};

fn generate_identity(name: &str) -> Cert {
    let (cert, _revocation) = CertBuilder::new()
        .add_userid(name)
        .add_authentication_subkey()
        .generate()
        .expect("identity generation");
    cert
}

fn cert_bytes(cert: &Cert) -> Vec<u8> {
    let mut buf = Vec::new();
    cert.serialize(&mut buf).expect("certificate serialization");
    buf
}

/// Relay every datagram each gateway has queued since the last drain, in
/// both directions, once.
async fn relay_once(
    gw_a: &MemoryGateway,
    session_a: &Arc<Session>,
    gw_b: &MemoryGateway,
    session_b: &Arc<Session>,
) {
    for (_, buf) in gw_a.drain_sent() {
        let _ = session_b.receive(&buf).await;
    }
    for (_, buf) in gw_b.drain_sent() {
        let _ = session_a.receive(&buf).await;
    }
}

#[tokio::test]
async fn full_handshake_verifies_both_peers_and_delivers_application_data() {
    let alice_cert = generate_identity("alice@overlay.example");
    let bob_cert = generate_identity("bob@overlay.example");
    let alice_bytes = cert_bytes(&alice_cert);
    let bob_bytes = cert_bytes(&bob_cert);

    let alice_keyring = Arc::new(MemoryKeyring::new());
    alice_keyring.seed(bob_bytes.clone(), false, false);
    let bob_keyring = Arc::new(MemoryKeyring::new());
    bob_keyring.seed(alice_bytes.clone(), false, false);

    let gw_alice = MemoryGateway::new(Credentials {
        certificate: alice_bytes,
        priority: "default".into(),
    });
    let gw_bob = MemoryGateway::new(Credentials {
        certificate: bob_bytes,
        priority: "default".into(),
    });

    let addr_alice: SocketAddr = "127.0.0.1:41000".parse().unwrap();
    let addr_bob: SocketAddr = "127.0.0.1:41001".parse().unwrap();

    let session_bob = Session::accept(
        SessionDeps {
            gateway: Arc::clone(&gw_bob) as Arc<dyn Gateway>,
            keyring: bob_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: SessionTimeouts::default(),
        },
        addr_alice,
    );
    let session_alice = Session::connect(
        SessionDeps {
            gateway: Arc::clone(&gw_alice) as Arc<dyn Gateway>,
            keyring: alice_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: SessionTimeouts::default(),
        },
        vec![addr_bob],
    )
    .expect("one candidate");

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        relay_once(&gw_alice, &session_alice, &gw_bob, &session_bob).await;
        if session_alice.is_verified() && session_bob.is_verified() {
            break;
        }
    }

    assert!(session_alice.is_verified());
    assert!(session_bob.is_verified());
    // Each side independently verifies its peer and registers its own
    // gateway's prefix table under the peer's derived overlay prefix,
    // pointing at the local session that reaches that peer (§4.6 step 11).
    assert_eq!(gw_alice.prefix_count(), 1, "alice registered bob under his prefix");
    assert_eq!(gw_bob.prefix_count(), 1, "bob registered alice under her prefix");

    session_alice
        .send(b"hello overlay, from alice")
        .await
        .expect("send on a completed handshake");
    tokio::time::sleep(Duration::from_millis(20)).await;
    relay_once(&gw_alice, &session_alice, &gw_bob, &session_bob).await;

    let delivered = gw_bob.delivered();
    assert_eq!(delivered.last().map(Vec::as_slice), Some(b"hello overlay, from alice".as_slice()));
}

#[tokio::test]
async fn unknown_peer_certificate_rejects_without_registering_a_prefix() {
    let alice_cert = generate_identity("alice@overlay.example");
    let bob_cert = generate_identity("bob@overlay.example");
    let alice_bytes = cert_bytes(&alice_cert);
    let bob_bytes = cert_bytes(&bob_cert);

    // Bob's keyring never learns Alice's certificate (§4.6 step 6: a
    // fingerprint miss is a silent reject, no alert).
    let alice_keyring = Arc::new(MemoryKeyring::new());
    alice_keyring.seed(bob_bytes.clone(), false, false);
    let bob_keyring = Arc::new(MemoryKeyring::new());

    let gw_alice = MemoryGateway::new(Credentials {
        certificate: alice_bytes,
        priority: "default".into(),
    });
    let gw_bob = MemoryGateway::new(Credentials {
        certificate: bob_bytes,
        priority: "default".into(),
    });

    let addr_alice: SocketAddr = "127.0.0.1:41010".parse().unwrap();
    let addr_bob: SocketAddr = "127.0.0.1:41011".parse().unwrap();

    let session_bob = Session::accept(
        SessionDeps {
            gateway: Arc::clone(&gw_bob) as Arc<dyn Gateway>,
            keyring: bob_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: SessionTimeouts::default(),
        },
        addr_alice,
    );
    let session_alice = Session::connect(
        SessionDeps {
            gateway: Arc::clone(&gw_alice) as Arc<dyn Gateway>,
            keyring: alice_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: SessionTimeouts::default(),
        },
        vec![addr_bob],
    )
    .expect("one candidate");

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        relay_once(&gw_alice, &session_alice, &gw_bob, &session_bob).await;
        if gw_bob.endpoint_count() == 0 {
            break;
        }
    }

    assert!(!session_bob.is_verified());
    assert_eq!(gw_bob.prefix_count(), 0, "rejected peer is never prefix-registered");
    assert_eq!(gw_bob.endpoint_count(), 0, "bob's session terminates on rejection");
}

#[tokio::test]
async fn handshake_timeout_fans_out_to_the_next_candidate_endpoint() {
    let alice_cert = generate_identity("alice@overlay.example");
    let alice_bytes = cert_bytes(&alice_cert);

    let gw_alice = MemoryGateway::new(Credentials {
        certificate: alice_bytes,
        priority: "default".into(),
    });

    // Endpoint A never answers (nothing is listening there); B and C are
    // never even dialed if fan-out didn't work. We only need to observe
    // that A's session disappears and a successor appears registered
    // under B with {C} retained as its remaining candidates.
    let addr_a: SocketAddr = "127.0.0.1:41020".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:41021".parse().unwrap();
    let addr_c: SocketAddr = "127.0.0.1:41022".parse().unwrap();

    let tight_timeouts = SessionTimeouts {
        retransmit: Duration::from_millis(5),
        handshake_deadline: Duration::from_millis(40),
        ..SessionTimeouts::default()
    };

    let _session_a = Session::connect(
        SessionDeps {
            gateway: Arc::clone(&gw_alice) as Arc<dyn Gateway>,
            keyring: Arc::new(MemoryKeyring::new()),
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: tight_timeouts,
        },
        vec![addr_a, addr_b, addr_c],
    )
    .expect("three candidates");

    assert_eq!(gw_alice.endpoint_count(), 1);
    assert!(gw_alice.by_endpoint(addr_a).is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(
        gw_alice.by_endpoint(addr_a).is_none(),
        "the session against A terminates on handshake timeout"
    );
    assert!(
        gw_alice.by_endpoint(addr_b).is_some(),
        "a successor session is spawned against B, the next candidate"
    );
    assert_eq!(gw_alice.endpoint_count(), 1, "exactly one session survives at a time");
}

#[tokio::test]
async fn missed_heartbeats_terminate_the_session() {
    let alice_cert = generate_identity("alice@overlay.example");
    let bob_cert = generate_identity("bob@overlay.example");
    let alice_bytes = cert_bytes(&alice_cert);
    let bob_bytes = cert_bytes(&bob_cert);

    let alice_keyring = Arc::new(MemoryKeyring::new());
    alice_keyring.seed(bob_bytes.clone(), false, false);
    let bob_keyring = Arc::new(MemoryKeyring::new());
    bob_keyring.seed(alice_bytes.clone(), false, false);

    let gw_alice = MemoryGateway::new(Credentials {
        certificate: alice_bytes,
        priority: "default".into(),
    });
    let gw_bob = MemoryGateway::new(Credentials {
        certificate: bob_bytes,
        priority: "default".into(),
    });

    let addr_alice: SocketAddr = "127.0.0.1:41030".parse().unwrap();
    let addr_bob: SocketAddr = "127.0.0.1:41031".parse().unwrap();

    let heartbeat_timeouts = SessionTimeouts {
        heartbeat_interval: Duration::from_millis(15),
        missed_ping_limit: 3,
        ..SessionTimeouts::default()
    };

    let session_bob = Session::accept(
        SessionDeps {
            gateway: Arc::clone(&gw_bob) as Arc<dyn Gateway>,
            keyring: bob_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: heartbeat_timeouts.clone(),
        },
        addr_alice,
    );
    let session_alice = Session::connect(
        SessionDeps {
            gateway: Arc::clone(&gw_alice) as Arc<dyn Gateway>,
            keyring: alice_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: heartbeat_timeouts,
        },
        vec![addr_bob],
    )
    .expect("one candidate");

    // Drive the handshake to completion, then stop relaying entirely —
    // simulating a peer that has gone silent. Alice (the client) sends her
    // first ping immediately on handshake completion (§4.3), so her missed
    // counter starts advancing without any further relay.
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        relay_once(&gw_alice, &session_alice, &gw_bob, &session_bob).await;
        if session_alice.is_verified() {
            break;
        }
    }
    assert!(session_alice.is_verified());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        gw_alice.endpoint_count(),
        0,
        "alice's session terminates after exceeding the missed-ping limit"
    );
}

#[tokio::test]
async fn explicit_terminate_deregisters_both_routing_handles() {
    let alice_cert = generate_identity("alice@overlay.example");
    let bob_cert = generate_identity("bob@overlay.example");
    let alice_bytes = cert_bytes(&alice_cert);
    let bob_bytes = cert_bytes(&bob_cert);

    let alice_keyring = Arc::new(MemoryKeyring::new());
    alice_keyring.seed(bob_bytes.clone(), false, false);
    let bob_keyring = Arc::new(MemoryKeyring::new());
    bob_keyring.seed(alice_bytes.clone(), false, false);

    let gw_alice = MemoryGateway::new(Credentials {
        certificate: alice_bytes,
        priority: "default".into(),
    });
    let gw_bob = MemoryGateway::new(Credentials {
        certificate: bob_bytes,
        priority: "default".into(),
    });

    let addr_alice: SocketAddr = "127.0.0.1:41040".parse().unwrap();
    let addr_bob: SocketAddr = "127.0.0.1:41041".parse().unwrap();

    let quick_grace = SessionTimeouts {
        destroy_grace: Duration::from_millis(10),
        ..SessionTimeouts::default()
    };

    let session_bob = Session::accept(
        SessionDeps {
            gateway: Arc::clone(&gw_bob) as Arc<dyn Gateway>,
            keyring: bob_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: quick_grace.clone(),
        },
        addr_alice,
    );
    let session_alice = Session::connect(
        SessionDeps {
            gateway: Arc::clone(&gw_alice) as Arc<dyn Gateway>,
            keyring: alice_keyring,
            keyserver: None,
            policy: VerificationPolicy::default(),
            timeouts: quick_grace,
        },
        vec![addr_bob],
    )
    .expect("one candidate");

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        relay_once(&gw_alice, &session_alice, &gw_bob, &session_bob).await;
        if session_alice.is_verified() && session_bob.is_verified() {
            break;
        }
    }
    assert!(session_alice.is_verified() && session_bob.is_verified());
    assert_eq!(gw_bob.prefix_count(), 1);

    session_bob.terminate().await;
    session_bob.terminate().await; // idempotent, per §5

    assert_eq!(gw_bob.endpoint_count(), 0, "endpoint handle is always deregistered");
    assert_eq!(gw_bob.prefix_count(), 0, "prefix handle is deregistered because bob was verified");
}
