//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Value};

use tandem_core::{Keypair, WriterKey};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random writer key.
pub fn writer_key() -> impl Strategy<Value = WriterKey> {
    keypair().prop_map(|kp| kp.writer_key())
}

/// Generate a drive path.
pub fn path() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(/[a-z]{1,6}){0,2}\\.txt".prop_map(String::from)
}

/// Generate a custom operation that writes a file.
///
/// Paths come from a small alphabet so collisions (and first-write-wins)
/// show up often.
pub fn file_write() -> impl Strategy<Value = Value> {
    (prop::sample::select(vec!["a.txt", "b.txt", "docs/c.txt"]), "[a-z0-9]{0,16}")
        .prop_map(|(path, blob)| json!({ "type": "file", "filename": path, "blob": blob }))
}

/// Generate a custom operation with no file.
pub fn note() -> impl Strategy<Value = Value> {
    (any::<u32>(), "[a-z ]{0,24}")
        .prop_map(|(n, text)| json!({ "type": "note", "n": n, "text": text }))
}

/// Generate any custom operation.
pub fn custom_op() -> impl Strategy<Value = Value> {
    prop_oneof![note(), file_write()]
}

/// Generate up to `max_len` custom operations.
pub fn custom_ops(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(custom_op(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem::{Tandem, TandemOptions};
    use tandem_store::{DriveView, OrderedView};
    use tandem_sync::PeerStore;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    /// Append `ops` on one peer, copy its entries to a second peer and
    /// return both instances, settled.
    async fn replicate<V: tandem_store::View>(
        ops: Vec<Value>,
        view: impl Fn() -> V,
    ) -> (Tandem<V>, Tandem<V>) {
        let owner = Tandem::open(PeerStore::new(), TandemOptions::new(view()))
            .await
            .unwrap();
        for op in ops {
            owner.append(op).await.unwrap();
        }

        let store = PeerStore::new();
        let replica = Tandem::open(
            store.clone(),
            TandemOptions::new(view()).with_log(owner.key(), owner.encryption_key()),
        )
        .await
        .unwrap();
        store.pull(owner.store(), &owner.key());
        replica.update().await.unwrap();
        (owner, replica)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_ordered_replicas_agree(ops in custom_ops(12)) {
            runtime().block_on(async {
                let (owner, replica) = replicate(ops, OrderedView::new).await;
                assert_eq!(owner.view().await.values(), replica.view().await.values());
                assert!(!replica.writable());
            });
        }

        #[test]
        fn test_drive_replicas_agree(ops in prop::collection::vec(file_write(), 1..12)) {
            runtime().block_on(async {
                let first = ops[0].clone();
                let (owner, replica) = replicate(ops, DriveView::new).await;

                let files = owner.files("").await.unwrap();
                assert_eq!(files, replica.files("").await.unwrap());
                for file in &files {
                    assert_eq!(
                        owner.read_file(&file.path).await.unwrap(),
                        replica.read_file(&file.path).await.unwrap()
                    );
                }

                // The first write to a path is the one that sticks.
                let path = first["filename"].as_str().unwrap();
                let blob = first["blob"].as_str().unwrap();
                assert_eq!(replica.read_file(path).await.unwrap().unwrap(), blob.as_bytes());
            });
        }

        #[test]
        fn test_paths_are_relative(p in path()) {
            prop_assert!(!p.starts_with('/'));
            prop_assert!(p.ends_with(".txt"));
        }
    }
}
