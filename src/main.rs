//! Standalone RTI server binary: bind the admission socket, admit the
//! configured number of federates, and run until every federate session
//! exits.

use clap::Parser;
use rti_federated::rti;

/// Runtime Infrastructure coordinator for a federated, deterministic
/// discrete-event execution framework.
#[derive(Debug, Parser)]
#[command(name = "rti", version, about)]
struct Args {
    /// Federation id that connecting federates must present.
    #[arg(short = 'i', long = "id")]
    federation_id: String,

    /// Number of federates to admit before the federation starts.
    #[arg(short = 'n', long = "number-of-federates")]
    number_of_federates: usize,

    /// TCP port to listen on for federate connections.
    #[arg(short = 'p', long, default_value_t = 15045)]
    port: u16,

    /// Offer clock synchronization rounds during admission.
    #[arg(long)]
    clock_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let listener = rti::create_listener(args.port).await?;
    tracing::info!(port = args.port, federation_id = %args.federation_id, "RTI listening");

    let config = rti::Config::new(&args.federation_id)
        .with_federates(args.number_of_federates)
        .with_clock_sync(args.clock_sync);

    let handles = rti::start_rti(listener, config).await?;
    tracing::info!(start_time = ?handles.start_time, "federation started");

    handles.rti_handle.await??;
    tracing::info!("federation complete, all federates exited");

    Ok(())
}
