use arithmpc_common::field::Fp;
use arithmpc_mpc::{Dealer, ProtocolParams, Worker};
use arithmpc_network::tcp::TcpMesh;
use arithmpc_network::MeshConfig;
use ark_std::rand::rngs::StdRng;
use ark_std::rand::SeedableRng;
use tokio::task::JoinSet;

use crate::utils::test_utils::setup_tracing;

pub mod utils;

/// The whole reference fixture over real sockets: three workers and the
/// dealer on loopback, MAC checks on.
#[tokio::test]
async fn full_session_over_tcp() {
    setup_tracing();
    let base_port = 47311;
    let params = ProtocolParams::new(3).with_malicious(true);

    let mut workers = JoinSet::new();
    for id in params.worker_ids() {
        let params = params.clone();
        workers.spawn(async move {
            let config = MeshConfig::loopback(id, params.dealer_id(), base_port);
            let transport = TcpMesh::connect(config).await.expect("worker mesh");
            Worker::new(params, transport)
                .expect("worker setup")
                .run()
                .await
                .expect("worker session");
        });
    }

    let config = MeshConfig::loopback(params.dealer_id(), params.dealer_id(), base_port);
    let transport = TcpMesh::connect(config).await.expect("dealer mesh");
    let dealer = Dealer::new(params, transport).expect("dealer setup");
    let mut rng = StdRng::seed_from_u64(99);
    let outcome = dealer
        .run(&[Fp::from(7u64), Fp::from(5u64)], &mut rng)
        .await
        .expect("session outcome");

    assert_eq!(outcome.sum, Fp::from(12u64));
    assert_eq!(outcome.product, Fp::from(35u64));

    while let Some(result) = workers.join_next().await {
        result.unwrap();
    }
}
