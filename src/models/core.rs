use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

/// A resolved client record. Raw submissions from several channels may
/// attribute back to one company through the attribution engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: &str, email: Option<&str>, phone: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.map(|e| e.to_string()),
            phone: phone.map(|p| p.to_string()),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
    Cancelled,
}

/// A token-scoped message thread owned by one company. The access token is
/// issued once and never rotated; archiving the project revokes access.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub company_id: String,
    pub access_token: String,
    pub title: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(company_id: &str, access_token: &str, title: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            access_token: access_token.to_string(),
            title: title.to_string(),
            status: ProjectStatus::Active,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Client,
    Admin,
}

/// Append-only; `read_at` is the one field written after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub sender_type: SenderType,
    pub sender_name: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        project_id: &str,
        sender_type: SenderType,
        sender_name: &str,
        content: &str,
        attachments: Vec<String>
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            sender_type,
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            attachments,
            created_at: Utc::now(),
            read_at: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub company_id: Option<String>,
    pub project_id: Option<String>,
    /// Provider event id; webhook retries dedupe on this.
    pub external_id: Option<String>,
    pub datetime: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn new(datetime: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            company_id: None,
            project_id: None,
            external_id: None,
            datetime,
            duration_minutes,
            status: AppointmentStatus::Scheduled,
            notes: None,
        }
    }
}
