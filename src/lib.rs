pub mod attribution;
pub mod booking;
pub mod cli;
pub mod error;
pub mod models;
pub mod notify;
pub mod realtime;
pub mod routing;
pub mod server;
pub mod storage;
pub mod token;

use std::error::Error;
use std::sync::Arc;

use log::info;

use cli::Args;
use server::{ AppState, Server };

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
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
