use std::collections::{ HashMap, HashSet };

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::models::core::{ Appointment, Company, Message, Project, ProjectStatus };
use crate::storage::Storage;

#[derive(Default)]
struct Tables {
    companies: HashMap<String, Company>,
    projects: HashMap<String, Project>,
    token_index: HashMap<String, String>,
    messages: HashMap<String, Vec<Message>>,
    appointments: HashMap<String, Appointment>,
    seen_events: HashSet<String>,
}

/// Process-local storage. Backs the `memory` storage type and the unit tests;
/// everything is lost on restart.
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { tables: Mutex::new(Tables::default()) }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_company(&self, company: &Company) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        if tables.companies.contains_key(&company.id) {
            return Err(CoreError::Conflict(format!("company {} already exists", company.id)));
        }
        tables.companies.insert(company.id.clone(), company.clone());
        Ok(())
    }

    async fn find_company(&self, id: &str) -> Result<Option<Company>, CoreError> {
        Ok(self.tables.lock().await.companies.get(id).cloned())
    }

    async fn list_companies(&self) -> Result<Vec<Company>, CoreError> {
        Ok(self.tables.lock().await.companies.values().cloned().collect())
    }

    async fn create_project(&self, project: &Project) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        if tables.token_index.contains_key(&project.access_token) {
            return Err(CoreError::Conflict("access token already issued".to_string()));
        }
        tables.token_index.insert(project.access_token.clone(), project.id.clone());
        tables.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn find_project(&self, id: &str) -> Result<Option<Project>, CoreError> {
        Ok(self.tables.lock().await.projects.get(id).cloned())
    }

    async fn find_project_by_token(&self, token: &str) -> Result<Option<Project>, CoreError> {
        let tables = self.tables.lock().await;
        let id = match tables.token_index.get(token) {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(tables.projects.get(id).cloned())
    }

    async fn projects_for_company(&self, company_id: &str) -> Result<Vec<Project>, CoreError> {
        Ok(
            self.tables
                .lock().await
                .projects.values()
                .filter(|p| p.company_id == company_id)
                .cloned()
                .collect()
        )
    }

    async fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus
    ) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        match tables.projects.get_mut(id) {
            Some(project) => {
                project.status = status;
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("project {}", id))),
        }
    }

    async fn append_message(&self, message: &Message) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        tables.messages
            .entry(message.project_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages_for_project(
        &self,
        project_id: &str,
        limit: usize
    ) -> Result<Vec<Message>, CoreError> {
        let tables = self.tables.lock().await;
        let messages = tables.messages.get(project_id).cloned().unwrap_or_default();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn mark_messages_read(
        &self,
        project_id: &str,
        at: DateTime<Utc>
    ) -> Result<u64, CoreError> {
        let mut tables = self.tables.lock().await;
        let mut updated = 0;
        if let Some(messages) = tables.messages.get_mut(project_id) {
            for message in messages.iter_mut().filter(|m| m.read_at.is_none()) {
                message.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn create_appointment(&self, appointment: &Appointment) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        tables.appointments.insert(appointment.id.clone(), appointment.clone());
        Ok(())
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.appointments.contains_key(&appointment.id) {
            return Err(CoreError::NotFound(format!("appointment {}", appointment.id)));
        }
        tables.appointments.insert(appointment.id.clone(), appointment.clone());
        Ok(())
    }

    async fn find_appointment(&self, id: &str) -> Result<Option<Appointment>, CoreError> {
        Ok(self.tables.lock().await.appointments.get(id).cloned())
    }

    async fn find_appointment_by_external_id(
        &self,
        external_id: &str
    ) -> Result<Option<Appointment>, CoreError> {
        Ok(
            self.tables
                .lock().await
                .appointments.values()
                .find(|a| a.external_id.as_deref() == Some(external_id))
                .cloned()
        )
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>, CoreError> {
        Ok(self.tables.lock().await.appointments.values().cloned().collect())
    }

    async fn claim_event(&self, event_id: &str) -> Result<bool, CoreError> {
        Ok(self.tables.lock().await.seen_events.insert(event_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::SenderType;

    #[tokio::test]
    async fn token_index_resolves_projects() {
        let store = MemoryStorage::new();
        let company = Company::new("Acme", Some("acme@example.com"), None);
        store.create_company(&company).await.unwrap();

        let project = Project::new(&company.id, "tok_abc", "Inquiry");
        store.create_project(&project).await.unwrap();

        let found = store.find_project_by_token("tok_abc").await.unwrap().unwrap();
        assert_eq!(found.id, project.id);
        assert!(store.find_project_by_token("tok_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_access_token_is_a_conflict() {
        let store = MemoryStorage::new();
        let a = Project::new("c1", "tok_same", "One");
        let b = Project::new("c1", "tok_same", "Two");
        store.create_project(&a).await.unwrap();
        let err = store.create_project(&b).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn messages_are_chronological_and_capped() {
        let store = MemoryStorage::new();
        for i in 0..5 {
            let msg = Message::new("p1", SenderType::Client, "c", &format!("m{}", i), vec![]);
            store.append_message(&msg).await.unwrap();
        }
        let last_two = store.messages_for_project("p1", 2).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "m3");
        assert_eq!(last_two[1].content, "m4");
    }

    #[tokio::test]
    async fn read_receipts_only_touch_unread_messages() {
        let store = MemoryStorage::new();
        let msg = Message::new("p1", SenderType::Client, "c", "hello", vec![]);
        store.append_message(&msg).await.unwrap();

        assert_eq!(store.mark_messages_read("p1", Utc::now()).await.unwrap(), 1);
        assert_eq!(store.mark_messages_read("p1", Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn event_ids_claim_exactly_once() {
        let store = MemoryStorage::new();
        assert!(store.claim_event("acuity:123").await.unwrap());
        assert!(!store.claim_event("acuity:123").await.unwrap());
        assert!(store.claim_event("acuity:124").await.unwrap());
    }
}
