use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use crate::attribution::{ self, ContactInput, ACCEPT_THRESHOLD };
use crate::error::CoreError;
use crate::models::core::{ Company, Project, ProjectStatus };
use crate::storage::Storage;
use crate::token;

/// Outcome of routing one inbound interaction to exactly one conversation.
#[derive(Clone, Debug)]
pub struct Routed {
    pub company: Company,
    pub project: Project,
    /// True when no identity was confident enough and a new one was created.
    pub identity_created: bool,
    /// True when the session-resuming policy reused an existing conversation.
    pub existing: bool,
    pub confidence: f32,
}

/// Maps inbound interactions onto conversations under two deliberately
/// distinct policies: public-form and webhook traffic always gets a fresh
/// token (one submission can never read another's history), while member
/// re-entry reuses the latest active conversation for the identity.
pub struct ConversationRouter {
    storage: Arc<dyn Storage>,
    // Per-identity guard across the member find-or-create sequence. Without
    // it two concurrent first contacts both observe "no active conversation"
    // and each mint one.
    identity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationRouter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            identity_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Token-first path: the caller already holds a token, so no identity
    /// resolution happens at all.
    pub async fn resolve_token(&self, raw_token: &str) -> Result<Project, CoreError> {
        let raw_token = raw_token.trim();
        if !token::validate_format(raw_token) {
            return Err(CoreError::Validation("malformed conversation token".to_string()));
        }
        self.storage
            .find_project_by_token(raw_token).await?
            .ok_or_else(|| CoreError::NotFound("no conversation for token".to_string()))
    }

    /// Privacy-preserving policy: always mint a brand-new conversation, even
    /// when the identity already has others.
    pub async fn route_always_new(
        &self,
        contact: &ContactInput,
        title_prefix: &str
    ) -> Result<Routed, CoreError> {
        let (company, identity_created, confidence) = self.resolve_company(contact).await?;
        let project = self.mint_project(&company, title_prefix).await?;
        info!(
            "Routed {} to fresh conversation {} (identity {}, created: {})",
            contact.email,
            project.id,
            company.id,
            identity_created
        );
        Ok(Routed {
            company,
            project,
            identity_created,
            existing: false,
            confidence,
        })
    }

    /// Session-resuming policy: reuse the most recently created active
    /// conversation for the identity, minting one only when none exists.
    pub async fn route_member(&self, contact: &ContactInput) -> Result<Routed, CoreError> {
        let (company, identity_created, confidence) = self.resolve_company(contact).await?;

        let lock = self.identity_lock(&company.id).await;
        let _guard = lock.lock().await;

        let mut projects = self.storage.projects_for_company(&company.id).await?;
        projects.retain(|p| p.status == ProjectStatus::Active);
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(project) = projects.into_iter().next() {
            info!("Member {} resumes conversation {}", contact.email, project.id);
            return Ok(Routed {
                company,
                project,
                identity_created,
                existing: true,
                confidence,
            });
        }

        let project = self.mint_project(&company, "Client Portal").await?;
        Ok(Routed {
            company,
            project,
            identity_created,
            existing: false,
            confidence,
        })
    }

    /// Resolve or lazily create the identity behind a contact. Exact match
    /// wins outright; a top candidate at the accept threshold is reused;
    /// anything weaker creates a fresh record.
    async fn resolve_company(
        &self,
        contact: &ContactInput
    ) -> Result<(Company, bool, f32), CoreError> {
        if contact.email.trim().is_empty() {
            return Err(CoreError::Validation("email is required".to_string()));
        }
        if contact.name.trim().is_empty() {
            return Err(CoreError::Validation("name is required".to_string()));
        }

        let known = self.storage.list_companies().await?;
        let attribution = attribution::resolve(contact, &known);

        if let Some(company) = attribution.exact_match {
            return Ok((company, false, 100.0));
        }

        if !attribution.should_create_new {
            if let Some(top) = attribution.candidates.first() {
                debug_assert!(top.confidence >= ACCEPT_THRESHOLD);
                if let Some(company) = known.into_iter().find(|c| c.id == top.company_id) {
                    info!(
                        "Attributed {} to existing identity {} at confidence {}",
                        contact.email,
                        company.id,
                        top.confidence
                    );
                    return Ok((company, false, top.confidence));
                }
            }
        }

        let company = Company::new(
            contact.name.trim(),
            Some(contact.email.trim()),
            contact.phone.as_deref()
        );
        self.storage.create_company(&company).await?;
        info!("Created identity {} for {}", company.id, contact.email);
        Ok((company, true, 0.0))
    }

    async fn mint_project(
        &self,
        company: &Company,
        title_prefix: &str
    ) -> Result<Project, CoreError> {
        let issued = token::issue(title_prefix);
        let title = format!("{} #{}", title_prefix, issued.submission_id);
        let project = Project::new(&company.id, &issued.token, &title);
        self.storage.create_project(&project).await?;
        Ok(project)
    }

    async fn identity_lock(&self, company_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.identity_locks.lock().await;
        locks
            .entry(company_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
