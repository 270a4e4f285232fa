//! Dropcast server binary.
//!
//! Reads its configuration from `DROPCAST_*` environment variables and
//! serves until Ctrl-C.

use dropcast::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), DropcastError> {
    let config = Config::from_env()?;
    init_tracing(config.debug);
    tracing::info!(?config, "starting Dropcast");

    let builder = DropcastServerBuilder::from_config(&config);
    match config.password.clone() {
        Some(password) => serve(builder.build(SharedToken::new(password)).await?).await,
        None => serve(builder.build(AllowAll).await?).await,
    }
}

async fn serve<A: Authenticator>(server: DropcastServer<A>) -> Result<(), DropcastError> {
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

fn init_tracing(debug: bool) {
    let fallback = if debug {
        "dropcast=debug,dropcast_room=debug,dropcast_transport=debug"
    } else {
        "dropcast=info,dropcast_room=info,dropcast_transport=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
