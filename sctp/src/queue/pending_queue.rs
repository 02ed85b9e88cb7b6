use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::chunk::chunk_payload_data::ChunkPayloadData;

/// Queue of DATA chunks accepted from the application but not yet moved to
/// the inflight queue.
///
/// Shared between streams (producers) and the association's write path
/// (consumer). `append` inserts all fragments of one message in a single
/// critical section, so fragments of different messages never interleave and
/// the consumer can rely on begin..end runs being contiguous.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    chunks: Mutex<VecDeque<ChunkPayloadData>>,
    queue_len: AtomicUsize,
    n_bytes: AtomicUsize,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        PendingQueue::default()
    }

    pub(crate) fn push(&self, c: ChunkPayloadData) {
        let user_data_len = c.user_data.len();
        {
            let mut chunks = self.chunks.lock().unwrap();
            chunks.push_back(c);
        }
        self.n_bytes.fetch_add(user_data_len, Ordering::SeqCst);
        self.queue_len.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn append(&self, chunks: Vec<ChunkPayloadData>) {
        if chunks.is_empty() {
            return;
        }

        let total_user_data_len = chunks.iter().fold(0, |acc, c| acc + c.user_data.len());
        let chunks_len = chunks.len();
        {
            let mut queue = self.chunks.lock().unwrap();
            queue.extend(chunks);
        }
        self.n_bytes.fetch_add(total_user_data_len, Ordering::SeqCst);
        self.queue_len.fetch_add(chunks_len, Ordering::SeqCst);
    }

    pub(crate) fn peek(&self) -> Option<ChunkPayloadData> {
        let chunks = self.chunks.lock().unwrap();
        chunks.front().cloned()
    }

    pub(crate) fn pop(&self) -> Option<ChunkPayloadData> {
        let popped = {
            let mut chunks = self.chunks.lock().unwrap();
            chunks.pop_front()
        };

        if let Some(p) = &popped {
            self.n_bytes.fetch_sub(p.user_data.len(), Ordering::SeqCst);
            self.queue_len.fetch_sub(1, Ordering::SeqCst);
        }

        popped
    }

    pub(crate) fn get_num_bytes(&self) -> usize {
        self.n_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue_len.load(Ordering::SeqCst)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
