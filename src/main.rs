mod database;
mod error;
mod models;
mod order;
mod routes;
mod status;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use log::info;
use mongodb::bson::doc;
use mongodb::Client;
use tokio::time::Duration;

use database::Db;
use routes::AppState;
use status::TransitionPolicy;

async fn init_mongo_client() -> Result<Client> {
    let uri = dotenv::var("MONGO_URI").expect("MONGO_URI must be set");
    let client = Client::with_uri_str(&uri).await?;

    for _ in 0..5 {
        match client.database("admin").run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                info!("MongoDB connection established successfully");
                return Ok(client);
            }
            Err(_) => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };
    }

    panic!("could not establish MongoDB connection")
}

fn load_transition_policy() -> Result<TransitionPolicy> {
    match dotenv::var("TRANSITION_POLICY") {
        Ok(value) => value.parse().map_err(anyhow::Error::msg),
        Err(_) => Ok(TransitionPolicy::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    std::env::set_var("RUST_LOG", "info");

    env_logger::builder()
        .format_file(true)
        .format_line_number(true)
        .format_target(false)
        .init();

    let client = init_mongo_client().await?;
    let db_name = dotenv::var("MONGO_DB").unwrap_or_else(|_| String::from("grocery"));
    let db = Db::new(client, &db_name);
    db.ensure_indexes().await?;

    let policy = load_transition_policy()?;
    info!("transition policy: {:?}", policy);

    let state = Arc::new(AppState { db, policy });
    let app = routes::app(state);

    let socket = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        dotenv::var("SERVER_PORT").unwrap_or_else(|_| String::from("8080")).parse()?,
    );
    let listener = tokio::net::TcpListener::bind(socket).await?;

    info!("Server initialized and listening on {}", socket.port());

    axum::serve(listener, app).await?;
    Ok(())
}
