//! Remote sync: replace a same-named object in one container.
//!
//! Delete-then-create is not atomic. Between the deletes and the create the
//! container holds no live copy of the name; a crash there is recovered by
//! re-running, since the operation converges to one live object.

use tracing::{debug, info};

use crate::error::TransportError;
use crate::pipeline::types::RemoteObject;
use crate::session::ObjectStore;

/// Content type used for every uploaded member.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Replace every live `filename` in `container_id` with one new object.
pub async fn sync<S: ObjectStore + ?Sized>(
    store: &S,
    container_id: &str,
    filename: &str,
    content: Vec<u8>,
) -> Result<RemoteObject, TransportError> {
    let stale = store.list_objects(container_id, filename).await?;

    if stale.len() > 1 {
        debug!(
            filename,
            count = stale.len(),
            "Multiple live copies found, removing all"
        );
    }

    for object in &stale {
        store.delete_object(&object.id).await?;
        info!(filename, object_id = %object.id, "Removed previous version");
    }

    let size = content.len();
    let created = store
        .create_object(container_id, filename, content, OCTET_STREAM)
        .await?;
    info!(filename, object_id = %created.id, size, "Uploaded");

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;

    const C: &str = "folder-1";

    #[tokio::test]
    async fn sync_twice_same_content_is_idempotent() {
        let store = MemorySession::new();
        sync(&store, C, "A.txt", b"x".to_vec()).await.unwrap();
        sync(&store, C, "A.txt", b"x".to_vec()).await.unwrap();

        assert_eq!(store.objects_in(C), vec![("A.txt".to_string(), b"x".to_vec())]);
    }

    #[tokio::test]
    async fn sync_overwrites_previous_content() {
        let store = MemorySession::new();
        sync(&store, C, "A.txt", b"x".to_vec()).await.unwrap();
        sync(&store, C, "A.txt", b"y".to_vec()).await.unwrap();

        assert_eq!(store.objects_in(C), vec![("A.txt".to_string(), b"y".to_vec())]);
    }

    #[tokio::test]
    async fn all_duplicate_copies_are_removed() {
        let store = MemorySession::new();
        store.seed_object(C, "A.txt", b"old-1");
        store.seed_object(C, "A.txt", b"old-2");

        sync(&store, C, "A.txt", b"new".to_vec()).await.unwrap();

        assert_eq!(store.objects_in(C), vec![("A.txt".to_string(), b"new".to_vec())]);
        assert_eq!(store.calls().deletes, 2);
    }

    #[tokio::test]
    async fn other_containers_and_names_untouched() {
        let store = MemorySession::new();
        store.seed_object("other", "A.txt", b"keep");
        store.seed_object(C, "B.txt", b"keep");

        sync(&store, C, "A.txt", b"new".to_vec()).await.unwrap();

        assert_eq!(store.objects_in("other"), vec![("A.txt".to_string(), b"keep".to_vec())]);
        assert_eq!(store.objects_in(C).len(), 2);
    }

    #[tokio::test]
    async fn upload_uses_octet_stream() {
        let store = MemorySession::new();
        let created = sync(&store, C, "A.txt", b"x".to_vec()).await.unwrap();

        assert_eq!(created.parent_container_id, C);
        assert_eq!(store.mime_type_of(&created.id).as_deref(), Some(OCTET_STREAM));
    }

    #[tokio::test]
    async fn failed_create_leaves_no_live_copy() {
        let store = MemorySession::new();
        store.seed_object(C, "A.txt", b"old");
        store.fail_create_of("A.txt");

        assert!(sync(&store, C, "A.txt", b"new".to_vec()).await.is_err());
        assert!(store.objects_in(C).is_empty());
    }
}
