use std::sync::Arc;

use collabdoc::routes;
use collabdoc::services::identity::HttpIdentity;
use collabdoc::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");
    let identity_url = std::env::var("IDENTITY_URL").expect("IDENTITY_URL required");

    let identity = HttpIdentity::new(identity_url).expect("identity client init failed");
    let state = AppState::new(Arc::new(identity));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "collabdoc listening");
    axum::serve(listener, app).await.expect("server failed");
}
