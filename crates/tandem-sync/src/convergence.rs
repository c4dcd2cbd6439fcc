//! Convergence checks between peer stores.
//!
//! Two replicas that hold the same entries merge them into the same order,
//! so comparing a hash over the merged order is enough to tell whether their
//! views can differ.

use tandem_core::{Blake3Hash, Entry, EntryId, LogKey, WriterKey};

use crate::store::PeerStore;

/// Deterministic hash over a log's merged order.
///
/// Algorithm:
/// 1. Sort every held entry by `(clock, writer, seq)`
/// 2. Hash: H = Blake3(domain || log || id_1 || id_2 || ...)
///
/// Returns `None` if the store holds no entries for the log.
pub fn compute_log_state_hash(store: &PeerStore, log: &LogKey) -> Option<Blake3Hash> {
    let mut entries = store.all_entries(log);
    if entries.is_empty() {
        return None;
    }
    entries.sort_by_key(Entry::order_key);

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tandem-state-v0:");
    hasher.update(log.as_bytes());
    for entry in &entries {
        hasher.update(entry.compute_id().as_bytes());
    }
    Some(Blake3Hash(*hasher.finalize().as_bytes()))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both stores hold identical entries.
    Converged,
    /// Stores differ but agree where they overlap (may need more replication).
    NotConverged { reason: String },
    /// A writer signed two different entries at the same position.
    Forked {
        writer: WriterKey,
        seq: u64,
        local: EntryId,
        remote: EntryId,
    },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    pub fn is_forked(&self) -> bool {
        matches!(self, ConvergenceResult::Forked { .. })
    }
}

/// Compare what two stores hold for `log`.
pub fn verify_convergence(
    local: &PeerStore,
    remote: &PeerStore,
    log: &LogKey,
) -> ConvergenceResult {
    let mut writers: Vec<WriterKey> = local
        .heads(log)
        .into_iter()
        .chain(remote.heads(log))
        .map(|(writer, _)| writer)
        .collect();
    writers.sort();
    writers.dedup();

    let mut mismatch = None;
    for writer in writers {
        let ours = local.entries(log, &writer, 0);
        let theirs = remote.entries(log, &writer, 0);

        for (a, b) in ours.iter().zip(&theirs) {
            let (local_id, remote_id) = (a.compute_id(), b.compute_id());
            if local_id != remote_id {
                return ConvergenceResult::Forked {
                    writer,
                    seq: a.seq(),
                    local: local_id,
                    remote: remote_id,
                };
            }
        }

        if ours.len() != theirs.len() && mismatch.is_none() {
            mismatch = Some(format!(
                "feed {} length mismatch: local={}, remote={}",
                writer,
                ours.len(),
                theirs.len()
            ));
        }
    }

    if let Some(reason) = mismatch {
        return ConvergenceResult::NotConverged { reason };
    }
    if compute_log_state_hash(local, log) != compute_log_state_hash(remote, log) {
        return ConvergenceResult::NotConverged {
            reason: "state hash mismatch".into(),
        };
    }
    ConvergenceResult::Converged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{EntryBuilder, Keypair};

    fn fill(store: &PeerStore, keypair: &Keypair, log: LogKey, count: u64) {
        store.track(log);
        for seq in 1..=count {
            let entry = EntryBuilder::new(log, seq)
                .clock(seq)
                .payload(format!("payload {}", seq).into_bytes())
                .sign(keypair);
            store.ingest(entry).unwrap();
        }
    }

    #[test]
    fn test_state_hash_deterministic() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let log = LogKey::from(keypair.writer_key());
        let a = PeerStore::new();
        let b = PeerStore::new();
        fill(&a, &keypair, log, 5);
        fill(&b, &keypair, log, 5);

        assert!(compute_log_state_hash(&a, &log).is_some());
        assert_eq!(compute_log_state_hash(&a, &log), compute_log_state_hash(&b, &log));
        assert!(verify_convergence(&a, &b, &log).is_converged());
    }

    #[test]
    fn test_length_mismatch() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let log = LogKey::from(keypair.writer_key());
        let a = PeerStore::new();
        let b = PeerStore::new();
        fill(&a, &keypair, log, 5);
        fill(&b, &keypair, log, 3);

        let result = verify_convergence(&a, &b, &log);
        assert!(!result.is_converged());
        assert!(!result.is_forked());
    }

    #[test]
    fn test_fork_detected() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let log = LogKey::from(keypair.writer_key());
        let a = PeerStore::new();
        let b = PeerStore::new();
        fill(&a, &keypair, log, 1);
        b.track(log);
        b.ingest(
            EntryBuilder::new(log, 1)
                .clock(1)
                .payload(b"other".to_vec())
                .sign(&keypair),
        )
        .unwrap();

        assert!(verify_convergence(&a, &b, &log).is_forked());
    }

    #[test]
    fn test_empty_log_has_no_hash() {
        let store = PeerStore::new();
        assert!(compute_log_state_hash(&store, &LogKey::from_bytes([1; 32])).is_none());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Stores that ingest the same feeds in any interleaving end with
            /// the same state hash.
            #[test]
            fn test_interleaving_does_not_change_state(
                lengths in prop::collection::vec(1u64..6, 1..4),
                picks in prop::collection::vec(any::<prop::sample::Index>(), 0..32),
            ) {
                let writers: Vec<Keypair> = (0..lengths.len())
                    .map(|i| Keypair::from_seed(&[i as u8 + 1; 32]))
                    .collect();
                let log = LogKey::from(writers[0].writer_key());
                let feeds: Vec<Vec<Entry>> = writers
                    .iter()
                    .zip(&lengths)
                    .map(|(keypair, &len)| {
                        (1..=len)
                            .map(|seq| {
                                EntryBuilder::new(log, seq)
                                    .clock(seq * 2 + u64::from(keypair.writer_key().0[0] & 1))
                                    .payload(vec![seq as u8])
                                    .sign(keypair)
                            })
                            .collect()
                    })
                    .collect();

                // In feed order, one writer after another.
                let a = PeerStore::new();
                a.track(log);
                for entry in feeds.iter().flatten() {
                    a.ingest(entry.clone()).unwrap();
                }

                // Interleaved by `picks`, then whatever is left.
                let b = PeerStore::new();
                b.track(log);
                let mut next = vec![0usize; feeds.len()];
                for pick in &picks {
                    let feed = pick.index(feeds.len());
                    if let Some(entry) = feeds[feed].get(next[feed]) {
                        b.ingest(entry.clone()).unwrap();
                        next[feed] += 1;
                    }
                }
                for (feed, entries) in feeds.iter().enumerate() {
                    for entry in &entries[next[feed]..] {
                        b.ingest(entry.clone()).unwrap();
                    }
                }

                prop_assert_eq!(compute_log_state_hash(&a, &log), compute_log_state_hash(&b, &log));
                prop_assert!(verify_convergence(&a, &b, &log).is_converged());
            }
        }
    }
}
