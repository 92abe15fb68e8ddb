//! Session identity: one stable id per storage scope.
//!
//! The id scopes realtime topics (`/topic/*/{id}`) and the persisted history key, and is sent
//! with every analyze request. It is generated once and reused until storage is cleared.

use crate::storage::KeyValueStore;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Storage key holding the session id.
pub const SESSION_ID_KEY: &str = "sessionId";

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Return the stored session id, or generate, persist and return a new one.
///
/// Never fails: an unreadable store counts as "no prior id", and a failed write is logged
/// (the id is then only stable for this process).
pub fn get_or_create_session_id(store: &dyn KeyValueStore) -> SessionId {
    match store.get(SESSION_ID_KEY) {
        Ok(Some(id)) if !id.trim().is_empty() => return id,
        Ok(_) => {}
        Err(e) => log::warn!("reading session id failed, creating a new one: {}", e),
    }
    let id = new_session_id();
    if let Err(e) = store.set(SESSION_ID_KEY, &id) {
        log::error!("persisting session id failed: {}", e);
    }
    log::info!("created session {}", id);
    id
}

/// `session-{unix millis}-{9 base36 chars}`.
pub fn new_session_id() -> SessionId {
    let millis = crate::time::now().timestamp_millis();
    format!("session-{}-{}", millis, random_suffix())
}

fn random_suffix() -> String {
    let mut bytes = [0u8; SUFFIX_LEN];
    if let Err(e) = getrandom::getrandom(&mut bytes) {
        log::warn!("getrandom failed, falling back to uuid: {}", e);
        bytes.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..SUFFIX_LEN]);
    }
    bytes
        .iter()
        .map(|b| BASE36[(*b as usize) % BASE36.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError};

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disk gone".to_string()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk gone".to_string()))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk gone".to_string()))
        }
    }

    #[test]
    fn same_store_yields_same_id() {
        let store = MemoryStore::new();
        let first = get_or_create_session_id(&store);
        let second = get_or_create_session_id(&store);
        assert_eq!(first, second);
        assert_eq!(store.get(SESSION_ID_KEY).unwrap(), Some(first));
    }

    #[test]
    fn existing_id_is_returned_unchanged() {
        let store = MemoryStore::new();
        store.set(SESSION_ID_KEY, "session-123").unwrap();
        assert_eq!(get_or_create_session_id(&store), "session-123");
    }

    #[test]
    fn stored_id_is_not_normalized_but_blank_counts_as_missing() {
        let store = MemoryStore::new();
        store.set(SESSION_ID_KEY, " session-42 ").unwrap();
        assert_eq!(get_or_create_session_id(&store), " session-42 ");

        store.set(SESSION_ID_KEY, "   ").unwrap();
        let id = get_or_create_session_id(&store);
        assert!(id.starts_with("session-"));
        assert_eq!(store.get(SESSION_ID_KEY).unwrap(), Some(id));
    }

    #[test]
    fn new_ids_have_expected_shape_and_differ() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        let parts: Vec<&str> = a.splitn(3, '-').collect();
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn unavailable_storage_still_yields_an_id() {
        let id = get_or_create_session_id(&BrokenStore);
        assert!(id.starts_with("session-"));
    }
}
