use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agents::agent_names;
use crate::error::{Result, ServiceError};
use crate::models::{
    CaseView, Claim, ClaimEvent, ClaimStatus, ConversationBoard, ConversationRecord,
    ConversationStatus, DecisionEntry, MessageKind,
};

pub const CLAIMS_KEY: &str = "claims";
pub const CONVERSATIONS_KEY: &str = "conversations";

const UNKNOWN: &str = "Unknown";

/// Whole-document key/value persistence. A write replaces the entire document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>>;
    async fn write(&self, key: &str, document: Value) -> Result<()>;
}

/// Stores each document as pretty-printed `<dir>/<key>.json`.
pub struct FileDocumentStore {
    dir: PathBuf,
}

impl FileDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let document = serde_json::from_str(&raw).map_err(|e| {
            ServiceError::Persistence(format!("{} is not valid JSON: {e}", path.display()))
        })?;
        Ok(Some(document))
    }

    async fn write(&self, key: &str, document: Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let staging = self.dir.join(format!("{key}.json.tmp"));
        let body = serde_json::to_string_pretty(&document)?;

        // Readers see either the old or the new document, never a torn write.
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(path = %path.display(), "Document written");
        Ok(())
    }
}

/// In-memory implementation of DocumentStore
pub struct InMemoryDocumentStore {
    documents: Arc<DashMap<String, Value>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.documents.get(key).map(|entry| entry.clone()))
    }

    async fn write(&self, key: &str, document: Value) -> Result<()> {
        self.documents.insert(key.to_string(), document);
        Ok(())
    }
}

/// Claim and conversation collections on top of a [`DocumentStore`].
///
/// Every mutation is a read-modify-write of a whole collection. Mutations go
/// through one async mutex, so within a process there is a single writer at a
/// time. Separate processes sharing the same store can still race, and the
/// last writer wins.
pub struct CaseRepository {
    store: Arc<dyn DocumentStore>,
    write_guard: Mutex<()>,
}

impl CaseRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            write_guard: Mutex::new(()),
        }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.store.read(key).await? {
            Some(document) => serde_json::from_value(document).map_err(|e| {
                ServiceError::Persistence(format!("{key} collection is malformed: {e}"))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        self.store.write(key, serde_json::to_value(items)?).await?;
        debug!(collection = key, records = items.len(), "Collection saved");
        Ok(())
    }

    pub async fn claims(&self) -> Result<Vec<Claim>> {
        self.load(CLAIMS_KEY).await
    }

    pub async fn claim(&self, claim_id: &str) -> Result<Claim> {
        self.claims()
            .await?
            .into_iter()
            .find(|claim| claim.claim_id == claim_id)
            .ok_or_else(|| ServiceError::ClaimNotFound(claim_id.to_string()))
    }

    pub async fn insert_claim(&self, claim: Claim) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut claims: Vec<Claim> = self.load(CLAIMS_KEY).await?;
        info!(claim_id = %claim.claim_id, status = ?claim.status, "Claim stored");
        claims.push(claim);
        self.save(CLAIMS_KEY, &claims).await
    }

    /// Hands a claim to a human. Repeated takeovers each append their own
    /// history entry. A linked conversation moves to `REQUIRES_HUMAN`.
    ///
    /// Both collections are loaded and updated in memory before either is
    /// written, so an unreadable collection leaves the claim untouched.
    pub async fn takeover_case(&self, claim_id: &str, admin_user: &str, reason: &str) -> Result<Claim> {
        let _guard = self.write_guard.lock().await;
        let mut claims: Vec<Claim> = self.load(CLAIMS_KEY).await?;
        let claim = claims
            .iter_mut()
            .find(|claim| claim.claim_id == claim_id)
            .ok_or_else(|| ServiceError::ClaimNotFound(claim_id.to_string()))?;

        let mut linked_records = None;
        if let Some(conversation_id) = claim.conversation_id.as_deref() {
            let mut records: Vec<ConversationRecord> = self.load(CONVERSATIONS_KEY).await?;
            if let Some(record) = records
                .iter_mut()
                .find(|record| record.conversation_id == conversation_id)
            {
                mark_requires_human(record, admin_user);
                linked_records = Some(records);
            }
        }

        claim.record(
            ClaimStatus::ManualTakeover,
            json!({ "admin_user": admin_user, "reason": reason }),
            Utc::now(),
        );
        let updated = claim.clone();
        self.save(CLAIMS_KEY, &claims).await?;
        if let Some(records) = linked_records {
            self.save(CONVERSATIONS_KEY, &records).await?;
        }

        info!(claim_id = %claim_id, admin_user = %admin_user, "Case taken over");
        Ok(updated)
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationRecord>> {
        self.load(CONVERSATIONS_KEY).await
    }

    /// Creates the record if it does not exist yet, otherwise refreshes the
    /// customer name and problem type that were supplied.
    pub async fn ensure_conversation(
        &self,
        conversation_id: &str,
        customer_name: Option<&str>,
        problem_type: Option<&str>,
    ) -> Result<ConversationRecord> {
        if conversation_id.trim().is_empty() {
            return Err(ServiceError::Validation(
                "conversation_id is required".to_string(),
            ));
        }

        let _guard = self.write_guard.lock().await;
        let mut records: Vec<ConversationRecord> = self.load(CONVERSATIONS_KEY).await?;
        let record = upsert(&mut records, conversation_id, customer_name, problem_type);
        let record = record.clone();
        self.save(CONVERSATIONS_KEY, &records).await?;
        Ok(record)
    }

    pub async fn append_message(
        &self,
        conversation_id: &str,
        kind: MessageKind,
        content: &str,
        sender: &str,
    ) -> Result<ConversationRecord> {
        if content.trim().is_empty() {
            return Err(ServiceError::Validation(
                "message content is required".to_string(),
            ));
        }
        self.update_conversation(conversation_id, |record| {
            record.push_message(kind, content, sender, Utc::now());
        })
        .await
    }

    /// Logs one customer/assistant exchange, creating the record on first use.
    pub async fn log_turn(
        &self,
        conversation_id: &str,
        customer_name: Option<&str>,
        problem_type: Option<&str>,
        customer_message: &str,
        reply: &str,
    ) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut records: Vec<ConversationRecord> = self.load(CONVERSATIONS_KEY).await?;
        let record = upsert(&mut records, conversation_id, customer_name, problem_type);
        let now = Utc::now();
        record.push_message(MessageKind::User, customer_message, "Customer", now);
        record.push_message(MessageKind::Agent, reply, "AI Agent", now);
        self.save(CONVERSATIONS_KEY, &records).await
    }

    pub async fn list_conversations(&self) -> Result<ConversationBoard> {
        let mut board = ConversationBoard::default();
        for record in self.conversations().await? {
            match record.status {
                ConversationStatus::Open => board.open.push(record),
                ConversationStatus::RequiresHuman => board.requires_human.push(record),
                ConversationStatus::Closed => board.closed.push(record),
            }
        }
        Ok(board)
    }

    pub async fn takeover_conversation(
        &self,
        conversation_id: &str,
        admin_user: &str,
    ) -> Result<ConversationRecord> {
        let record = self
            .update_conversation(conversation_id, |record| {
                mark_requires_human(record, admin_user)
            })
            .await?;
        info!(conversation_id = %conversation_id, admin_user = %admin_user, "Conversation taken over");
        Ok(record)
    }

    pub async fn close_conversation(&self, conversation_id: &str) -> Result<ConversationRecord> {
        let record = self
            .update_conversation(conversation_id, |record| {
                record.status = ConversationStatus::Closed;
                record.is_active = false;
                record.touch(Utc::now());
            })
            .await?;
        info!(conversation_id = %conversation_id, "Conversation closed");
        Ok(record)
    }

    /// Every claim, oldest first, with its transcript and decision trail.
    pub async fn list_cases_for_admin(&self) -> Result<Vec<CaseView>> {
        let claims = self.claims().await?;
        let records = self.conversations().await?;

        let cases = claims
            .into_iter()
            .map(|claim| {
                let conversation = claim
                    .conversation_id
                    .as_deref()
                    .and_then(|id| records.iter().find(|r| r.conversation_id == id))
                    .map(|record| record.messages.clone())
                    .unwrap_or_default();
                let decisions = decision_trail(&claim.history);
                CaseView {
                    claim,
                    conversation,
                    decisions,
                }
            })
            .collect();
        Ok(cases)
    }

    async fn update_conversation<F>(&self, conversation_id: &str, apply: F) -> Result<ConversationRecord>
    where
        F: FnOnce(&mut ConversationRecord),
    {
        let _guard = self.write_guard.lock().await;
        let mut records: Vec<ConversationRecord> = self.load(CONVERSATIONS_KEY).await?;
        let record = records
            .iter_mut()
            .find(|record| record.conversation_id == conversation_id)
            .ok_or_else(|| ServiceError::ConversationNotFound(conversation_id.to_string()))?;
        apply(record);
        let updated = record.clone();
        self.save(CONVERSATIONS_KEY, &records).await?;
        Ok(updated)
    }
}

fn upsert<'a>(
    records: &'a mut Vec<ConversationRecord>,
    conversation_id: &str,
    customer_name: Option<&str>,
    problem_type: Option<&str>,
) -> &'a mut ConversationRecord {
    let now = Utc::now();
    let index = match records
        .iter()
        .position(|record| record.conversation_id == conversation_id)
    {
        Some(index) => {
            let record = &mut records[index];
            if let Some(name) = customer_name {
                record.customer_name = name.to_string();
            }
            if let Some(problem_type) = problem_type {
                record.problem_type = problem_type.to_string();
            }
            record.touch(now);
            index
        }
        None => {
            info!(conversation_id = %conversation_id, "Conversation record created");
            records.push(ConversationRecord::new(
                conversation_id,
                customer_name.unwrap_or(UNKNOWN),
                problem_type.unwrap_or(UNKNOWN),
                now,
            ));
            records.len() - 1
        }
    };
    &mut records[index]
}

fn mark_requires_human(record: &mut ConversationRecord, admin_user: &str) {
    record.status = ConversationStatus::RequiresHuman;
    record.requires_human = true;
    record.admin_user = Some(admin_user.to_string());
    record.touch(Utc::now());
}

fn decision_trail(history: &[ClaimEvent]) -> Vec<DecisionEntry> {
    history
        .iter()
        .enumerate()
        .map(|(index, event)| {
            let (agent, decision) = match event.status {
                ClaimStatus::Open => (agent_names::CLAIMS_FOLLOWUP.to_string(), "Claim opened"),
                ClaimStatus::Dispatched => (
                    agent_names::DISPATCH_LOGISTICS.to_string(),
                    "Service provider dispatched",
                ),
                ClaimStatus::Resolved => {
                    (agent_names::CLAIMS_FOLLOWUP.to_string(), "Case resolved")
                }
                ClaimStatus::ManualTakeover => (
                    event
                        .details
                        .get("admin_user")
                        .and_then(Value::as_str)
                        .unwrap_or("admin")
                        .to_string(),
                    "Taken over for manual handling",
                ),
            };
            DecisionEntry {
                step: index + 1,
                agent,
                decision: decision.to_string(),
                details: event.details.clone(),
                timestamp: event.timestamp,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_repository() -> CaseRepository {
        CaseRepository::new(Arc::new(InMemoryDocumentStore::new()))
    }

    fn sample_claim(conversation_id: Option<&str>) -> Claim {
        let mut claim = Claim::open(
            "John Doe",
            "XYZ-12345",
            "battery issue",
            conversation_id.map(str::to_string),
            Utc::now(),
        );
        claim.record(
            ClaimStatus::Dispatched,
            json!({ "provider": "24/7 Roadside Rescue", "eta_minutes": 15 }),
            Utc::now(),
        );
        claim
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty_collection() {
        let dir = TempDir::new().unwrap();
        let repository = CaseRepository::new(Arc::new(FileDocumentStore::new(dir.path())));
        assert!(repository.claims().await.unwrap().is_empty());
        assert!(repository.conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claims_survive_a_new_repository() {
        let dir = TempDir::new().unwrap();
        let claim = sample_claim(None);
        let claim_id = claim.claim_id.clone();

        CaseRepository::new(Arc::new(FileDocumentStore::new(dir.path())))
            .insert_claim(claim)
            .await
            .unwrap();

        let reopened = CaseRepository::new(Arc::new(FileDocumentStore::new(dir.path())));
        let stored = reopened.claim(&claim_id).await.unwrap();
        assert_eq!(stored.status, ClaimStatus::Dispatched);
        assert_eq!(stored.history.len(), 2);
        assert!(dir.path().join("claims.json").exists());
    }

    #[tokio::test]
    async fn malformed_file_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("claims.json"), "{ not json").unwrap();
        let repository = CaseRepository::new(Arc::new(FileDocumentStore::new(dir.path())));

        let err = repository.claims().await.unwrap_err();
        assert!(matches!(err, ServiceError::Persistence(_)));

        let write = repository.insert_claim(sample_claim(None)).await;
        assert!(matches!(write, Err(ServiceError::Persistence(_))));
        let untouched = std::fs::read_to_string(dir.path().join("claims.json")).unwrap();
        assert_eq!(untouched, "{ not json");
    }

    #[tokio::test]
    async fn takeover_twice_appends_two_entries() {
        let repository = memory_repository();
        let claim = sample_claim(None);
        let claim_id = claim.claim_id.clone();
        repository.insert_claim(claim).await.unwrap();

        let first = repository
            .takeover_case(&claim_id, "alice", "customer called in")
            .await
            .unwrap();
        let second = repository
            .takeover_case(&claim_id, "bob", "escalation")
            .await
            .unwrap();

        assert_eq!(first.status, ClaimStatus::ManualTakeover);
        assert_eq!(second.status, ClaimStatus::ManualTakeover);
        let takeovers: Vec<&ClaimEvent> = second
            .history
            .iter()
            .filter(|event| event.status == ClaimStatus::ManualTakeover)
            .collect();
        assert_eq!(takeovers.len(), 2);
        assert_eq!(takeovers[0].details["admin_user"], "alice");
        assert_eq!(takeovers[1].details["reason"], "escalation");
    }

    #[tokio::test]
    async fn takeover_of_unknown_claim_is_not_found() {
        let err = memory_repository()
            .takeover_case("missing", "alice", "reason")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ClaimNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn takeover_flags_the_linked_conversation() {
        let repository = memory_repository();
        repository
            .ensure_conversation("conv-1", Some("John Doe"), Some("battery issue"))
            .await
            .unwrap();
        let claim = sample_claim(Some("conv-1"));
        let claim_id = claim.claim_id.clone();
        repository.insert_claim(claim).await.unwrap();

        repository
            .takeover_case(&claim_id, "alice", "manual check")
            .await
            .unwrap();

        let board = repository.list_conversations().await.unwrap();
        assert!(board.open.is_empty());
        assert_eq!(board.requires_human.len(), 1);
        assert_eq!(board.requires_human[0].admin_user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn unreadable_conversations_leave_the_claim_untouched() {
        let dir = TempDir::new().unwrap();
        let repository = CaseRepository::new(Arc::new(FileDocumentStore::new(dir.path())));
        repository
            .ensure_conversation("conv-1", Some("John Doe"), None)
            .await
            .unwrap();
        let claim = sample_claim(Some("conv-1"));
        let claim_id = claim.claim_id.clone();
        repository.insert_claim(claim).await.unwrap();
        std::fs::write(dir.path().join("conversations.json"), "[ truncated").unwrap();

        let result = repository.takeover_case(&claim_id, "alice", "manual check").await;
        assert!(matches!(result, Err(ServiceError::Persistence(_))));

        let stored = repository.claim(&claim_id).await.unwrap();
        assert_eq!(stored.status, ClaimStatus::Dispatched);
        assert_eq!(stored.history.len(), 2);
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let repository = memory_repository();
        repository
            .ensure_conversation("conv-1", None, None)
            .await
            .unwrap();
        repository
            .append_message("conv-1", MessageKind::User, "my tyre is flat", "Customer")
            .await
            .unwrap();
        let refreshed = repository
            .ensure_conversation("conv-1", Some("John Doe"), Some("flat tire"))
            .await
            .unwrap();
        assert_eq!(refreshed.customer_name, "John Doe");
        assert_eq!(refreshed.messages.len(), 1);

        let taken = repository
            .takeover_conversation("conv-1", "alice")
            .await
            .unwrap();
        assert_eq!(taken.status, ConversationStatus::RequiresHuman);
        assert!(taken.requires_human);

        let closed = repository.close_conversation("conv-1").await.unwrap();
        assert_eq!(closed.status, ConversationStatus::Closed);
        assert!(!closed.is_active);
        assert!(closed.last_updated >= taken.last_updated);

        let board = repository.list_conversations().await.unwrap();
        assert_eq!(board.closed.len(), 1);
    }

    #[tokio::test]
    async fn appending_to_unknown_conversation_is_not_found() {
        let err = memory_repository()
            .append_message("nope", MessageKind::Admin, "hello", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let repository = memory_repository();
        repository.ensure_conversation("conv-1", None, None).await.unwrap();
        let err = repository
            .append_message("conv-1", MessageKind::User, "   ", "Customer")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn admin_cases_include_transcript_and_decisions() {
        let repository = memory_repository();
        repository
            .log_turn("conv-7", None, None, "my battery is dead", "Sorry to hear that!")
            .await
            .unwrap();
        let mut claim = sample_claim(Some("conv-7"));
        claim.record(ClaimStatus::Resolved, json!({}), Utc::now());
        repository.insert_claim(claim).await.unwrap();
        repository.insert_claim(sample_claim(None)).await.unwrap();

        let cases = repository.list_cases_for_admin().await.unwrap();
        assert_eq!(cases.len(), 2);

        let linked = &cases[0];
        assert_eq!(linked.conversation.len(), 2);
        assert_eq!(linked.conversation[0].kind, MessageKind::User);
        assert_eq!(linked.conversation[1].sender, "AI Agent");
        let steps: Vec<usize> = linked.decisions.iter().map(|d| d.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert_eq!(linked.decisions[1].agent, agent_names::DISPATCH_LOGISTICS);

        assert!(cases[1].conversation.is_empty());
    }
}
