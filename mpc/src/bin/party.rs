//! One party of the additive-sharing MPC fixture.
//!
//! Invoked once per party id; the party with id `num_parties + 1` is the
//! dealer and must be the single invocation with `has_secret` set. The
//! endpoint table is static: party `i` listens on `127.0.0.1:(5555 + i - 1)`.

use std::process::ExitCode;

use arithmpc_common::field::{self, Fp};
use arithmpc_mpc::params::BASE_PORT;
use arithmpc_mpc::{Dealer, MpcError, ProtocolParams, Worker};
use arithmpc_network::tcp::TcpMesh;
use arithmpc_network::MeshConfig;
use ark_std::rand::rngs::StdRng;
use ark_std::rand::SeedableRng;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportMode {
    /// Retired lock-step request/reply transport.
    Reqrep,
    /// The canonical router/dealer mesh.
    Dealerrouter,
}

#[derive(Debug, Parser)]
#[command(name = "party", about = "One party of the additive-sharing MPC session")]
struct Cli {
    /// Transport flavour.
    #[arg(value_enum)]
    mode: TransportMode,
    /// 1-based party id; id `num_parties + 1` is the dealer.
    party_id: usize,
    /// Number of worker parties.
    num_parties: usize,
    /// Comma-separated u64 secrets; only the dealer's values are used.
    #[arg(value_delimiter = ',', num_args = 1)]
    input_value: Vec<u64>,
    /// 1 for the single invocation that holds the secrets, 0 otherwise.
    has_secret: u8,
    /// Requested operation, `add` or `mul`; the session always runs the
    /// full distribute, add, multiply, shutdown sequence.
    operation: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let party_id = cli.party_id;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("party {party_id}: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), MpcError> {
    validate(&cli)?;
    let params = ProtocolParams::new(cli.num_parties);
    let config = MeshConfig::loopback(cli.party_id, params.dealer_id(), BASE_PORT);
    let transport = TcpMesh::connect(config).await?;

    if cli.party_id == params.dealer_id() {
        let secrets: Vec<Fp> = cli
            .input_value
            .iter()
            .map(|&value| Fp::from(value))
            .collect();
        let mut rng = StdRng::from_entropy();
        let outcome = Dealer::new(params, transport)?
            .run(&secrets, &mut rng)
            .await?;
        println!("sum = {}", field::to_hex(&outcome.sum));
        println!("product = {}", field::to_hex(&outcome.product));
    } else {
        Worker::new(params, transport)?.run().await?;
    }
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), MpcError> {
    if cli.mode == TransportMode::Reqrep {
        return Err(MpcError::Config(
            "the reqrep transport is retired; use dealerrouter".to_owned(),
        ));
    }
    if cli.num_parties == 0 {
        return Err(MpcError::Config(
            "a session needs at least one worker".to_owned(),
        ));
    }
    let dealer_id = cli.num_parties + 1;
    if cli.party_id == 0 || cli.party_id > dealer_id {
        return Err(MpcError::Config(format!(
            "party id {} is outside 1..={dealer_id}",
            cli.party_id
        )));
    }
    let is_dealer = cli.party_id == dealer_id;
    if cli.has_secret > 1 {
        return Err(MpcError::Config(format!(
            "has_secret must be 0 or 1, got {}",
            cli.has_secret
        )));
    }
    if (cli.has_secret == 1) != is_dealer {
        let detail = if is_dealer {
            "the dealer invocation must set has_secret to 1"
        } else {
            "only the dealer invocation may set has_secret"
        };
        return Err(MpcError::Config(detail.to_owned()));
    }
    if is_dealer && cli.input_value.len() < 2 {
        return Err(MpcError::Config(
            "the dealer needs at least two comma-separated secrets".to_owned(),
        ));
    }
    if cli.operation != "add" && cli.operation != "mul" {
        return Err(MpcError::Config(format!(
            "unknown operation {:?}; expected add or mul",
            cli.operation
        )));
    }
    Ok(())
}

fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
