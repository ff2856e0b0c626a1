use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::{ error, warn };
use redis::{ AsyncCommands, Client };
use serde::Deserialize;

use crate::error::CoreError;
use crate::models::core::{ Appointment, Company, Message, Project, ProjectStatus };
use crate::storage::Storage;

/// Older deployments stored identities as "business" records. Both shapes are
/// accepted on read and normalized to `Company` here, at the storage boundary,
/// so the core only ever sees one shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityRecord {
    Company(Company),
    LegacyBusiness(LegacyBusiness),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBusiness {
    id: String,
    business_name: String,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    created_at: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    fn into_company(self) -> Company {
        match self {
            IdentityRecord::Company(company) => company,
            IdentityRecord::LegacyBusiness(legacy) =>
                Company {
                    id: legacy.id,
                    name: legacy.business_name,
                    email: legacy.contact_email,
                    phone: legacy.contact_phone,
                    tags: legacy.tags,
                    created_at: legacy.created_at.unwrap_or_else(Utc::now),
                },
        }
    }
}

pub struct RedisStorage {
    client: Client,
    key_prefix: String,
}

impl RedisStorage {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, CoreError> {
        Ok(Self {
            client: Client::open(host).map_err(|e| CoreError::Storage(e.to_string()))?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.key_prefix, suffix)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn create_company(&self, company: &Company) -> Result<(), CoreError> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(company)?;
        let _: () = conn.set(self.key(&format!("company:{}", company.id)), json).await?;
        let _: i64 = conn.sadd(self.key("companies"), &company.id).await?;
        Ok(())
    }

    async fn find_company(&self, id: &str) -> Result<Option<Company>, CoreError> {
        let mut conn = self.get_connection().await?;
        let json: Option<String> = conn.get(self.key(&format!("company:{}", id))).await?;
        match json {
            Some(json) => {
                let record: IdentityRecord = serde_json::from_str(&json)?;
                Ok(Some(record.into_company()))
            }
            None => Ok(None),
        }
    }

    async fn list_companies(&self) -> Result<Vec<Company>, CoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.smembers(self.key("companies")).await?;
        let mut companies = Vec::with_capacity(ids.len());
        for id in &ids {
            let json: Option<String> = conn.get(self.key(&format!("company:{}", id))).await?;
            match json {
                Some(json) =>
                    match serde_json::from_str::<IdentityRecord>(&json) {
                        Ok(record) => companies.push(record.into_company()),
                        Err(e) => error!("Skipping unreadable company record {}: {}", id, e),
                    }
                None => warn!("Company id {} indexed but record missing", id),
            }
        }
        Ok(companies)
    }

    async fn create_project(&self, project: &Project) -> Result<(), CoreError> {
        let mut conn = self.get_connection().await?;
        let claimed: bool = conn
            .set_nx(self.key(&format!("token:{}", project.access_token)), &project.id).await?;
        if !claimed {
            return Err(CoreError::Conflict("access token already issued".to_string()));
        }
        let json = serde_json::to_string(project)?;
        let _: () = conn.set(self.key(&format!("project:{}", project.id)), json).await?;
        let _: i64 = conn
            .sadd(self.key(&format!("company_projects:{}", project.company_id)), &project.id).await?;
        Ok(())
    }

    async fn find_project(&self, id: &str) -> Result<Option<Project>, CoreError> {
        let mut conn = self.get_connection().await?;
        let json: Option<String> = conn.get(self.key(&format!("project:{}", id))).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn find_project_by_token(&self, token: &str) -> Result<Option<Project>, CoreError> {
        let mut conn = self.get_connection().await?;
        let id: Option<String> = conn.get(self.key(&format!("token:{}", token))).await?;
        match id {
            Some(id) => self.find_project(&id).await,
            None => Ok(None),
        }
    }

    async fn projects_for_company(&self, company_id: &str) -> Result<Vec<Project>, CoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn
            .smembers(self.key(&format!("company_projects:{}", company_id))).await?;
        let mut projects = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(project) = self.find_project(id).await? {
                projects.push(project);
            }
        }
        Ok(projects)
    }

    async fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus
    ) -> Result<(), CoreError> {
        let mut project = self
            .find_project(id).await?
            .ok_or_else(|| CoreError::NotFound(format!("project {}", id)))?;
        project.status = status;
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(&project)?;
        let _: () = conn.set(self.key(&format!("project:{}", id)), json).await?;
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<(), CoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.key(&format!("messages:{}", message.project_id));
        let json = serde_json::to_string(message)?;
        let _: i64 = conn.lpush(&key, &json).await?;
        Ok(())
    }

    async fn messages_for_project(
        &self,
        project_id: &str,
        limit: usize
    ) -> Result<Vec<Message>, CoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.key(&format!("messages:{}", project_id));
        let json_entries: Vec<String> = conn.lrange(&key, 0, (limit as isize) - 1).await?;
        let mut messages = Vec::new();
        for json_entry in &json_entries {
            match serde_json::from_str::<Message>(json_entry) {
                Ok(message) => messages.push(message),
                Err(e) => error!("Error parsing message entry: {}", e),
            }
        }
        messages.reverse();
        Ok(messages)
    }

    async fn mark_messages_read(
        &self,
        project_id: &str,
        at: DateTime<Utc>
    ) -> Result<u64, CoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.key(&format!("messages:{}", project_id));
        let json_entries: Vec<String> = conn.lrange(&key, 0, -1).await?;
        if json_entries.is_empty() {
            return Ok(0);
        }

        let mut updated = 0u64;
        let mut rewritten = Vec::with_capacity(json_entries.len());
        for json_entry in &json_entries {
            match serde_json::from_str::<Message>(json_entry) {
                Ok(mut message) => {
                    if message.read_at.is_none() {
                        message.read_at = Some(at);
                        updated += 1;
                    }
                    rewritten.push(serde_json::to_string(&message)?);
                }
                Err(e) => {
                    error!("Keeping unreadable message entry verbatim: {}", e);
                    rewritten.push(json_entry.clone());
                }
            }
        }

        let _: () = conn.del(&key).await?;
        // lrange returned newest first; rpush in the same order restores the
        // original list layout.
        let _: i64 = conn.rpush(&key, rewritten).await?;
        Ok(updated)
    }

    async fn create_appointment(&self, appointment: &Appointment) -> Result<(), CoreError> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(appointment)?;
        let _: () = conn.set(self.key(&format!("appointment:{}", appointment.id)), json).await?;
        let _: i64 = conn.sadd(self.key("appointments"), &appointment.id).await?;
        if let Some(external_id) = &appointment.external_id {
            let _: () = conn
                .set(self.key(&format!("appointment_ext:{}", external_id)), &appointment.id).await?;
        }
        Ok(())
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<(), CoreError> {
        let existing: Option<String> = {
            let mut conn = self.get_connection().await?;
            conn.get(self.key(&format!("appointment:{}", appointment.id))).await?
        };
        if existing.is_none() {
            return Err(CoreError::NotFound(format!("appointment {}", appointment.id)));
        }
        self.create_appointment(appointment).await
    }

    async fn find_appointment(&self, id: &str) -> Result<Option<Appointment>, CoreError> {
        let mut conn = self.get_connection().await?;
        let json: Option<String> = conn.get(self.key(&format!("appointment:{}", id))).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn find_appointment_by_external_id(
        &self,
        external_id: &str
    ) -> Result<Option<Appointment>, CoreError> {
        let mut conn = self.get_connection().await?;
        let id: Option<String> = conn
            .get(self.key(&format!("appointment_ext:{}", external_id))).await?;
        match id {
            Some(id) => self.find_appointment(&id).await,
            None => Ok(None),
        }
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>, CoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.smembers(self.key("appointments")).await?;
        let mut appointments = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(appointment) = self.find_appointment(id).await? {
                appointments.push(appointment);
            }
        }
        Ok(appointments)
    }

    async fn claim_event(&self, event_id: &str) -> Result<bool, CoreError> {
        let mut conn = self.get_connection().await?;
        let added: i64 = conn.sadd(self.key("events"), event_id).await?;
        Ok(added == 1)
    }
}
