use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use arithmpc_network::framing::write_frame;
use arithmpc_network::tcp::TcpMesh;
use arithmpc_network::{MeshConfig, MeshTransport, NetworkError, RoutingId, RECV_TIMEOUT};
use tokio::net::TcpStream;

/// Each test carves its own port range so the meshes never collide.
static NEXT_BASE_PORT: AtomicU16 = AtomicU16::new(46200);

fn reserve_ports(count: u16) -> u16 {
    NEXT_BASE_PORT.fetch_add(count, Ordering::SeqCst)
}

async fn connect_mesh(n_members: usize, base_port: u16) -> Vec<TcpMesh> {
    let connects = (1..=n_members)
        .map(|id| TcpMesh::connect(MeshConfig::loopback(id, n_members, base_port)));
    futures::future::join_all(connects)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("mesh setup failed")
}

#[tokio::test]
async fn messages_carry_the_sender_identity() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    let mut second = meshes.remove(1);
    let mut first = meshes.remove(0);

    first.send_to(2, b"hello").await.unwrap();
    let message = second.recv_any(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(message.sender, 1);
    assert_eq!(message.routing_id, RoutingId::new(1, 2));
    assert_eq!(message.payload, b"hello");

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn per_link_order_is_preserved() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    let mut second = meshes.remove(1);
    let mut first = meshes.remove(0);

    for index in 0u32..32 {
        first.send_to(2, &index.to_be_bytes()).await.unwrap();
    }
    for index in 0u32..32 {
        let message = second.recv_any(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(message.payload, index.to_be_bytes());
    }

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn replies_travel_the_dealer_return_path() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    let mut second = meshes.remove(1);
    let mut first = meshes.remove(0);

    first.send_to(2, b"ping").await.unwrap();
    second.recv_any(Duration::from_secs(2)).await.unwrap().unwrap();
    second.reply(b"pong").await.unwrap();
    second.reply_to(RoutingId::new(1, 2), b"pong again").await.unwrap();

    assert_eq!(
        first.recv_from(2, Duration::from_secs(2)).await.unwrap().unwrap(),
        b"pong"
    );
    assert_eq!(
        first.recv_from(2, Duration::from_secs(2)).await.unwrap().unwrap(),
        b"pong again"
    );

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn broadcast_reaches_every_peer() {
    let base_port = reserve_ports(3);
    let mut meshes = connect_mesh(3, base_port).await;
    let mut third = meshes.remove(2);
    let mut second = meshes.remove(1);
    let mut first = meshes.remove(0);

    first.broadcast(b"round").await.unwrap();
    assert_eq!(
        second.recv_any(Duration::from_secs(2)).await.unwrap().unwrap().payload,
        b"round"
    );
    assert_eq!(
        third.recv_any(Duration::from_secs(2)).await.unwrap().unwrap().payload,
        b"round"
    );
    assert!(first.recv_any(RECV_TIMEOUT).await.unwrap().is_none());

    first.close().await;
    second.close().await;
    third.close().await;
}

#[tokio::test]
async fn receive_times_out_when_idle() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    assert!(meshes[0].recv_any(RECV_TIMEOUT).await.unwrap().is_none());
    assert!(meshes[0]
        .recv_from(2, RECV_TIMEOUT)
        .await
        .unwrap()
        .is_none());
    for mesh in &mut meshes {
        mesh.close().await;
    }
}

#[tokio::test]
async fn sending_to_an_unknown_peer_fails() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    let err = meshes[0].send_to(9, b"lost").await.unwrap_err();
    assert!(matches!(err, NetworkError::UnknownPeer(9)));
    for mesh in &mut meshes {
        mesh.close().await;
    }
}

#[tokio::test]
async fn malformed_identities_are_dropped_not_fatal() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    let mut second = meshes.remove(1);
    let mut first = meshes.remove(0);

    // A rogue peer speaks the framing but not the identity convention.
    let router_addr = format!("127.0.0.1:{}", base_port + 1);
    let mut rogue = TcpStream::connect(&router_addr).await.unwrap();
    write_frame(&mut rogue, b"Peer5_to_2").await.unwrap();
    write_frame(&mut rogue, b"discarded").await.unwrap();

    // The malformed message never surfaces.
    assert!(second.recv_any(RECV_TIMEOUT).await.unwrap().is_none());

    // The same connection recovers once it uses a well-formed identity.
    write_frame(&mut rogue, b"Party9_to_2").await.unwrap();
    write_frame(&mut rogue, b"accepted").await.unwrap();
    let message = second.recv_any(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(message.sender, 9);
    assert_eq!(message.payload, b"accepted");

    // Mesh members are unaffected throughout.
    first.send_to(2, b"still up").await.unwrap();
    let message = second.recv_any(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(message.sender, 1);
    assert_eq!(message.payload, b"still up");

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_stops_traffic() {
    let base_port = reserve_ports(2);
    let mut meshes = connect_mesh(2, base_port).await;
    let mut second = meshes.remove(1);
    let mut first = meshes.remove(0);

    first.close().await;
    first.close().await;
    assert!(matches!(
        first.send_to(2, b"late").await.unwrap_err(),
        NetworkError::Closed
    ));
    second.close().await;
}
