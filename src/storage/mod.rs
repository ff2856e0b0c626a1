mod memory;
mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::info;

use crate::cli::Args;
use crate::error::CoreError;
use crate::models::core::{ Appointment, Company, Message, Project, ProjectStatus };

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

/// Persistence collaborator for the routing, booking and messaging cores.
/// Implementations surface outages as `CoreError::Storage` and uniqueness
/// violations as `CoreError::Conflict`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_company(&self, company: &Company) -> Result<(), CoreError>;
    async fn find_company(&self, id: &str) -> Result<Option<Company>, CoreError>;
    async fn list_companies(&self) -> Result<Vec<Company>, CoreError>;

    async fn create_project(&self, project: &Project) -> Result<(), CoreError>;
    async fn find_project(&self, id: &str) -> Result<Option<Project>, CoreError>;
    async fn find_project_by_token(&self, token: &str) -> Result<Option<Project>, CoreError>;
    async fn projects_for_company(&self, company_id: &str) -> Result<Vec<Project>, CoreError>;
    async fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus
    ) -> Result<(), CoreError>;

    async fn append_message(&self, message: &Message) -> Result<(), CoreError>;
    /// Chronological order, capped at `limit` most recent entries.
    async fn messages_for_project(
        &self,
        project_id: &str,
        limit: usize
    ) -> Result<Vec<Message>, CoreError>;
    async fn mark_messages_read(
        &self,
        project_id: &str,
        at: DateTime<Utc>
    ) -> Result<u64, CoreError>;

    async fn create_appointment(&self, appointment: &Appointment) -> Result<(), CoreError>;
    async fn update_appointment(&self, appointment: &Appointment) -> Result<(), CoreError>;
    async fn find_appointment(&self, id: &str) -> Result<Option<Appointment>, CoreError>;
    async fn find_appointment_by_external_id(
        &self,
        external_id: &str
    ) -> Result<Option<Appointment>, CoreError>;
    async fn list_appointments(&self) -> Result<Vec<Appointment>, CoreError>;

    /// Webhook dedupe key. Returns true the first time an event id is seen,
    /// false on every retry of the same id.
    async fn claim_event(&self, event_id: &str) -> Result<bool, CoreError>;
}

pub fn create_storage(args: &Args) -> Result<Arc<dyn Storage>, CoreError> {
    match args.storage_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisStorage::new(&args.storage_host, &args.storage_prefix)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        other =>
            Err(CoreError::Validation(format!("Unsupported storage type: {}", other))),
    }
}

pub fn initialize_storage(args: &Args) -> Result<Arc<dyn Storage>, CoreError> {
    info!("Records will be stored in: {} at {}", args.storage_type, args.storage_host);
    create_storage(args)
}
