use std::sync::Arc;

use rideline::api::DynAPI;
use rideline::auth::TokenVerifier;
use rideline::config::Config;
use rideline::db::{connect, PgStore, RideStore};
use rideline::engine::Engine;
use rideline::error::Error;
use rideline::server::serve;

async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;

    let pool = connect(&config.database_url, config.database_max_connections).await?;
    let store: Arc<dyn RideStore> = Arc::new(PgStore::new(pool).await?);

    let engine = Engine::new(store, config.fares, config.request_ttl)?;
    let verifier = TokenVerifier::new(&config.jwt_secret);

    serve(Arc::new(engine) as DynAPI, verifier, config.bind_addr).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        tracing::error!(code = err.code, message = %err.message, "rideline stopped");
        std::process::exit(1);
    }
}
