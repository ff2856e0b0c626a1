pub mod api;
pub mod websocket;

use std::error::Error;
use std::sync::Arc;

use crate::booking::BookingGuard;
use crate::cli::Args;
use crate::notify::{ create_notifier, Notifier };
use crate::realtime::RealtimeHub;
use crate::routing::ConversationRouter;
use crate::storage::{ initialize_storage, Storage };

/// Everything the HTTP and WebSocket surfaces share. Built once at bootstrap
/// and passed by reference; no subsystem reaches for ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub hub: Arc<RealtimeHub>,
    pub router: Arc<ConversationRouter>,
    pub guard: Arc<BookingGuard>,
    pub notifier: Arc<dyn Notifier>,
    pub args: Args,
}

impl AppState {
    pub fn from_args(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let storage = initialize_storage(&args)?;
        let hub = Arc::new(RealtimeHub::new());
        let router = Arc::new(ConversationRouter::new(storage.clone()));
        let guard = Arc::new(
            BookingGuard::new(storage.clone(), args.collision_window_minutes, &args.booking_slots)
        );
        let notifier = create_notifier(&args)?;
        Ok(Self {
            storage,
            hub,
            router,
            guard,
            notifier,
            args,
        })
    }
}

pub struct Server {
    addr: String,
    state: Arc<AppState>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: Arc<AppState>, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.start_http_server().await?;
        self.start_ws_server().await?;
        Ok(())
    }

    async fn start_http_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(self.args.http_port, self.state.clone(), self.args.clone()).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(
            &self.addr,
            self.state.clone(),
            self.args.server_api_key.clone(),
            self.args.clone()
        ).await
    }
}
