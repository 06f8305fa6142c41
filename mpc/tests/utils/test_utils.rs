use arithmpc_common::field::Fp;
use arithmpc_mpc::{Dealer, MpcError, ProtocolParams, SessionOutcome, Worker};
use arithmpc_network::local::{local_mesh, LocalMesh};
use arithmpc_network::PartyId;
use ark_std::rand::rngs::StdRng;
use ark_std::rand::SeedableRng;
use once_cell::sync::Lazy;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
});

pub fn setup_tracing() {
    Lazy::force(&TRACING_INIT);
}

/// Builds the in-memory mesh for the whole ensemble, workers first and the
/// dealer last.
pub fn session_meshes(params: &ProtocolParams) -> Vec<LocalMesh> {
    let ids: Vec<PartyId> = params.member_ids().collect();
    local_mesh(&ids, 64)
}

/// Spawns one honest worker per worker id, runs the dealer inline and joins
/// the workers once the dealer is done.
pub async fn run_session(
    params: ProtocolParams,
    secrets: &[Fp],
    seed: u64,
) -> Result<SessionOutcome, MpcError> {
    setup_tracing();
    let mut meshes = session_meshes(&params);
    let dealer_mesh = meshes.pop().expect("the dealer mesh exists");

    let mut workers = JoinSet::new();
    for mesh in meshes {
        let worker = Worker::new(params.clone(), mesh).expect("worker setup");
        workers.spawn(worker.run());
    }

    let dealer = Dealer::new(params, dealer_mesh).expect("dealer setup");
    let mut rng = StdRng::seed_from_u64(seed);
    let outcome = dealer.run(secrets, &mut rng).await;

    while let Some(result) = workers.join_next().await {
        result
            .expect("worker task does not panic")
            .expect("worker exits cleanly");
    }
    outcome
}
