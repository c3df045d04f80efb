//! Capability traits implemented by every session backend.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::pipeline::types::{CandidateMessage, MessageSummary, RemoteObject};

/// Read-only access to a mailbox.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Run a provider search, returning at most `max_results` hits in
    /// provider order.
    async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, TransportError>;

    /// Fetch a message with its attachment parts.
    async fn get_message(&self, message_id: &str) -> Result<CandidateMessage, TransportError>;

    /// Download an attachment body in the provider's wire encoding (base64url).
    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<String, TransportError>;
}

/// Named objects grouped under parent containers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Live (non-trashed) objects in `container_id` whose name is exactly `name`.
    async fn list_objects(
        &self,
        container_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteObject>, TransportError>;

    async fn delete_object(&self, object_id: &str) -> Result<(), TransportError>;

    async fn create_object(
        &self,
        container_id: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject, TransportError>;
}

/// Both capabilities, as handed to the pipeline controller.
pub trait Session: MailService + ObjectStore {}

impl<T: MailService + ObjectStore + ?Sized> Session for T {}
