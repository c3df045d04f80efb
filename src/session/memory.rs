//! In-memory session backend.
//!
//! Search ignores the query text and returns the seeded messages in insertion
//! order, so tests control exactly what "the provider" ranks first. Every call
//! is counted so tests can assert which operations were attempted.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::TransportError;
use crate::pipeline::types::{CandidateMessage, MessageSummary, RemoteObject};
use crate::session::traits::{MailService, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    object: RemoteObject,
    content: Vec<u8>,
    mime_type: String,
}

/// Call counters, one per session operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub searches: Vec<String>,
    pub message_fetches: usize,
    pub attachment_fetches: usize,
    pub lists: usize,
    pub deletes: usize,
    pub creates: usize,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<CandidateMessage>,
    /// (message id, attachment id) → base64url payload.
    payloads: HashMap<(String, String), String>,
    objects: Vec<StoredObject>,
    next_object: u64,
    fail_search: bool,
    fail_create: HashSet<String>,
    calls: CallLog,
}

/// Mail + storage held in process memory.
#[derive(Debug, Default)]
pub struct MemorySession {
    state: Mutex<State>,
}

fn injected(service: &'static str, operation: &'static str) -> TransportError {
    TransportError::Status {
        service,
        operation,
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "injected failure".into(),
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a message to the mailbox. Search returns messages in this order.
    pub fn add_message(&self, message: CandidateMessage) {
        self.state().messages.push(message);
    }

    /// Register the wire payload served for one attachment.
    pub fn add_payload(&self, message_id: &str, attachment_id: &str, payload: impl Into<String>) {
        self.state().payloads.insert(
            (message_id.to_string(), attachment_id.to_string()),
            payload.into(),
        );
    }

    /// Place an existing object in a container, bypassing the call log.
    pub fn seed_object(&self, container_id: &str, name: &str, content: &[u8]) -> RemoteObject {
        self.state()
            .insert(container_id, name, content.to_vec(), "application/octet-stream")
    }

    /// Make every search fail with a transport error.
    pub fn fail_searches(&self) {
        self.state().fail_search = true;
    }

    /// Make creation of objects named `name` fail.
    pub fn fail_create_of(&self, name: &str) {
        self.state().fail_create.insert(name.to_string());
    }

    /// `(name, content)` of every object in `container_id`, sorted by name.
    pub fn objects_in(&self, container_id: &str) -> Vec<(String, Vec<u8>)> {
        let mut objects: Vec<(String, Vec<u8>)> = self
            .state()
            .objects
            .iter()
            .filter(|o| o.object.parent_container_id == container_id)
            .map(|o| (o.object.name.clone(), o.content.clone()))
            .collect();
        objects.sort();
        objects
    }

    /// MIME type recorded for the object with `id`.
    pub fn mime_type_of(&self, id: &str) -> Option<String> {
        self.state()
            .objects
            .iter()
            .find(|o| o.object.id == id)
            .map(|o| o.mime_type.clone())
    }

    pub fn calls(&self) -> CallLog {
        self.state().calls.clone()
    }
}

impl State {
    fn insert(
        &mut self,
        container_id: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> RemoteObject {
        self.next_object += 1;
        let object = RemoteObject {
            id: format!("obj-{}", self.next_object),
            name: name.to_string(),
            parent_container_id: container_id.to_string(),
        };
        self.objects.push(StoredObject {
            object: object.clone(),
            content,
            mime_type: mime_type.to_string(),
        });
        object
    }
}

#[async_trait]
impl MailService for MemorySession {
    async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        let mut state = self.state();
        state.calls.searches.push(query.to_string());
        if state.fail_search {
            return Err(injected("mail", "search"));
        }
        Ok(state
            .messages
            .iter()
            .take(max_results as usize)
            .map(|m| MessageSummary { id: m.id.clone() })
            .collect())
    }

    async fn get_message(&self, message_id: &str) -> Result<CandidateMessage, TransportError> {
        let mut state = self.state();
        state.calls.message_fetches += 1;
        state
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                service: "mail",
                operation: "get_message",
                status: StatusCode::NOT_FOUND,
                body: format!("no message {message_id}"),
            })
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<String, TransportError> {
        let mut state = self.state();
        state.calls.attachment_fetches += 1;
        state
            .payloads
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| TransportError::Status {
                service: "mail",
                operation: "get_attachment",
                status: StatusCode::NOT_FOUND,
                body: format!("no attachment {attachment_id}"),
            })
    }
}

#[async_trait]
impl ObjectStore for MemorySession {
    async fn list_objects(
        &self,
        container_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteObject>, TransportError> {
        let mut state = self.state();
        state.calls.lists += 1;
        Ok(state
            .objects
            .iter()
            .filter(|o| o.object.parent_container_id == container_id && o.object.name == name)
            .map(|o| o.object.clone())
            .collect())
    }

    async fn delete_object(&self, object_id: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.deletes += 1;
        let before = state.objects.len();
        state.objects.retain(|o| o.object.id != object_id);
        if state.objects.len() == before {
            return Err(TransportError::Status {
                service: "storage",
                operation: "delete_object",
                status: StatusCode::NOT_FOUND,
                body: format!("no object {object_id}"),
            });
        }
        Ok(())
    }

    async fn create_object(
        &self,
        container_id: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject, TransportError> {
        let mut state = self.state();
        state.calls.creates += 1;
        if state.fail_create.contains(name) {
            return Err(injected("storage", "create_object"));
        }
        Ok(state.insert(container_id, name, content, mime_type))
    }
}
