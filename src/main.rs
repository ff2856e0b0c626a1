mod attribution;
mod booking;
mod cli;
mod error;
mod models;
mod notify;
mod realtime;
mod routing;
mod server;
mod storage;
mod token;

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use log::info;

use cli::Args;
use server::{ AppState, Server };

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("--- Core Configuration ---");
    info!("WebSocket Address: {}", args.server_addr);
    info!("HTTP Port: {}", args.http_port);
    info!("Storage Type: {}", args.storage_type);
    info!("Storage Host: {}", args.storage_host);
    info!("Storage Prefix: {}", args.storage_prefix);
    info!("Collision Window: {} minutes", args.collision_window_minutes);
    info!("Booking Slots: {}", args.booking_slots.join(", "));
    info!("History Limit: {}", args.history_limit);
    info!("Admin Auth Configured: {}", args.admin_token.is_some());
    info!("Email Relay Configured: {}", args.notify_url.is_some());
    info!("-------------------------");

    let state = Arc::new(AppState::from_args(args.clone())?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
