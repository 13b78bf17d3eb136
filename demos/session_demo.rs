//! Runnable demonstration of a full session lifecycle: two in-process
//! peers, each holding an OpenPGP identity and a `MemoryGateway` standing
//! in for the real transport, drive a handshake to completion, verify each
//! other's certificate, exchange one application message, and tear down.
//!
//! Run with `cargo run --bin session-demo`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sequoia_openpgp::cert::CertBuilder;
use sequoia_openpgp::serialize::Serialize as _;
use sequoia_openpgp::Cert;

use tunnel_session::{
    Credentials, MemoryGateway, MemoryKeyring, Session, SessionDeps, SessionTimeouts,
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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let alice_cert = generate_identity("alice@overlay.example");
    let bob_cert = generate_identity("bob@overlay.example");
    let alice_bytes = cert_bytes(&alice_cert);
    let bob_bytes = cert_bytes(&bob_cert);

    // Each side's keyring holds the *other* side's certificate, as if
    // already exchanged out of band (§4.6 step 6's local-lookup gate).
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

    let addr_alice: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let addr_bob: SocketAddr = "127.0.0.1:40001".parse().unwrap();

    let deps_alice = SessionDeps {
        gateway: Arc::clone(&gw_alice) as Arc<dyn tunnel_session::Gateway>,
        keyring: alice_keyring,
        keyserver: None,
        policy: VerificationPolicy::default(),
        timeouts: SessionTimeouts::default(),
    };
    let deps_bob = SessionDeps {
        gateway: Arc::clone(&gw_bob) as Arc<dyn tunnel_session::Gateway>,
        keyring: bob_keyring,
        keyserver: None,
        policy: VerificationPolicy::default(),
        timeouts: SessionTimeouts::default(),
    };

    // Bob is the server: he was demultiplexed to Alice's address on first
    // inbound datagram, which this demo fakes by accepting up front.
    let session_bob = Session::accept(deps_bob, addr_alice);
    // Alice dials Bob directly; no fan-out candidates are needed here.
    let session_alice = Session::connect(deps_alice, vec![addr_bob]).expect("one candidate");

    // Manually relay datagrams between the two gateways — standing in for
    // the real Gateway's UDP socket and event loop — until both sides
    // report a completed, verified handshake.
    for round in 0..20 {
        tokio::time::sleep(Duration::from_millis(20)).await;

        for (_, buf) in gw_alice.drain_sent() {
            let _ = session_bob.receive(&buf).await;
        }
        for (_, buf) in gw_bob.drain_sent() {
            let _ = session_alice.receive(&buf).await;
        }

        if session_alice.is_verified() && session_bob.is_verified() {
            println!("handshake converged after {round} relay round(s)");
            break;
        }
    }

    assert!(session_alice.is_handshake_complete(), "alice's handshake stalled");
    assert!(session_bob.is_handshake_complete(), "bob's handshake stalled");
    assert!(session_alice.is_verified(), "alice never verified bob");
    assert!(session_bob.is_verified(), "bob never verified alice");

    session_alice
        .send(b"hello overlay, from alice")
        .await
        .expect("send over a completed handshake");

    tokio::time::sleep(Duration::from_millis(20)).await;
    for (_, buf) in gw_alice.drain_sent() {
        let _ = session_bob.receive(&buf).await;
    }

    let delivered = gw_bob.delivered();
    println!(
        "bob received {} message(s); last one: {:?}",
        delivered.len(),
        delivered.last().map(|b| String::from_utf8_lossy(b).into_owned())
    );

    session_alice.terminate().await;
    session_bob.terminate().await;

    // Give the deferred-destruction timers a moment before the process
    // exits, mirroring the grace period described in §4.1.
    tokio::time::sleep(Duration::from_millis(50)).await;
}
