//! Chunked fan-out over bounded queues, fan-in through a per-block barrier.
//!
//! A producer splits a batch into fixed-size chunks and submits one job per
//! chunk to a [`WorkerPool`]. Submission suspends while the queue is full,
//! which throttles the producer to the pace of the workers. When the
//! producer needs to know that every chunk reached a terminal state, each job
//! carries a [`ChunkTicket`]; dropping the ticket (success, logged failure,
//! or panic) counts the chunk as done on the shared [`BlockBarrier`].

use async_trait::async_trait;
use itertools::Itertools;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Split `items` into chunks of at most `chunk_size` elements.
///
/// A `chunk_size` of zero is treated as one.
pub fn split_into_chunks<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let chunks = items.into_iter().chunks(chunk_size.max(1));
    let chunks: Vec<Vec<T>> = (&chunks).into_iter().map(|chunk| chunk.collect()).collect();
    chunks
}

/// Counts outstanding chunks of one unit of work and wakes waiters when the
/// count reaches zero.
#[derive(Debug)]
pub struct BlockBarrier {
    remaining: AtomicUsize,
    done: Notify,
}

impl BlockBarrier {
    /// Create a barrier expecting `count` completions, together with one
    /// ticket per completion.
    pub fn with_tickets(count: usize) -> (Arc<Self>, Vec<ChunkTicket>) {
        let barrier = Arc::new(Self {
            remaining: AtomicUsize::new(count),
            done: Notify::new(),
        });
        let tickets = (0..count)
            .map(|_| ChunkTicket {
                barrier: Arc::clone(&barrier),
            })
            .collect();
        (barrier, tickets)
    }

    /// Number of chunks that have not reached a terminal state yet.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Suspend until every ticket has been dropped.
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.done.notified());
            notified.as_mut().enable();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn complete_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.done.notify_waiters();
        }
    }
}

/// Proof of one outstanding chunk. Dropping it marks the chunk as done.
#[derive(Debug)]
pub struct ChunkTicket {
    barrier: Arc<BlockBarrier>,
}

impl Drop for ChunkTicket {
    fn drop(&mut self) {
        self.barrier.complete_one();
    }
}

/// Processes jobs pulled from a [`WorkerPool`] queue.
///
/// Handlers own their error reporting: a failed job is logged and dropped,
/// never handed back to the pool.
#[async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    async fn handle(&self, job: J);
}

/// Returned when submitting to a pool whose workers are gone.
#[derive(Debug, Error)]
#[error("worker pool {0} is closed")]
pub struct PoolClosed(pub &'static str);

/// Cloneable handle for submitting jobs to a [`WorkerPool`].
#[derive(Debug)]
pub struct JobSender<J> {
    pool: &'static str,
    sender: mpsc::Sender<J>,
}

impl<J> Clone for JobSender<J> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool,
            sender: self.sender.clone(),
        }
    }
}

impl<J: Send + 'static> JobSender<J> {
    /// Enqueue a job, suspending while the queue is full.
    pub async fn submit(&self, job: J) -> Result<(), PoolClosed> {
        self.sender
            .send(job)
            .await
            .map_err(|_| PoolClosed(self.pool))
    }

    /// Split `items` into chunks and submit one ticketed job per chunk.
    ///
    /// Returns the barrier that opens once every job has dropped its ticket.
    /// If the pool closes midway, the unsent tickets are dropped so the
    /// barrier still opens.
    pub async fn fan_out<T, F>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        mut make_job: F,
    ) -> Result<Arc<BlockBarrier>, PoolClosed>
    where
        T: Send,
        F: FnMut(Vec<T>, ChunkTicket) -> J + Send,
    {
        let chunks = split_into_chunks(items, chunk_size);
        let (barrier, tickets) = BlockBarrier::with_tickets(chunks.len());
        for (chunk, ticket) in chunks.into_iter().zip(tickets) {
            self.submit(make_job(chunk, ticket)).await?;
        }
        Ok(barrier)
    }

    /// Split `items` into chunks and submit one job per chunk without
    /// tracking completion.
    pub async fn fan_out_detached<T, F>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        mut make_job: F,
    ) -> Result<usize, PoolClosed>
    where
        T: Send,
        F: FnMut(Vec<T>) -> J + Send,
    {
        let chunks = split_into_chunks(items, chunk_size);
        let count = chunks.len();
        for chunk in chunks {
            self.submit(make_job(chunk)).await?;
        }
        Ok(count)
    }
}

/// A fixed set of long-lived workers draining one bounded queue.
pub struct WorkerPool<J> {
    sender: JobSender<J>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `workers` tasks sharing a queue of `capacity` pending jobs.
    pub fn spawn<H: JobHandler<J>>(
        name: &'static str,
        workers: usize,
        capacity: usize,
        handler: Arc<H>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next job.
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        handler.handle(job).await;
                    }
                    debug!(pool = name, worker, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender: JobSender { pool: name, sender },
            workers,
        }
    }

    pub fn sender(&self) -> JobSender<J> {
        self.sender.clone()
    }

    pub async fn submit(&self, job: J) -> Result<(), PoolClosed> {
        self.sender.submit(job).await
    }

    /// Close the queue and wait for the workers to drain it.
    ///
    /// Workers only stop once every [`JobSender`] clone is gone.
    pub async fn shutdown(self) {
        let Self { sender, workers } = self;
        drop(sender);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_split_into_chunks() {
        let chunks = split_into_chunks((1..=7).collect::<Vec<_>>(), 3);
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
        assert!(split_into_chunks(Vec::<u8>::new(), 3).is_empty());
        assert_eq!(split_into_chunks(vec![1, 2], 0), vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_barrier_without_tickets_is_open() {
        let (barrier, tickets) = BlockBarrier::with_tickets(0);
        assert!(tickets.is_empty());
        barrier.wait().await;
    }

    #[tokio::test]
    async fn test_barrier_opens_after_last_ticket() {
        let (barrier, mut tickets) = BlockBarrier::with_tickets(2);
        let opened = Arc::new(AtomicBool::new(false));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            let opened = Arc::clone(&opened);
            tokio::spawn(async move {
                barrier.wait().await;
                opened.store(true, Ordering::SeqCst);
            })
        };

        drop(tickets.pop());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!opened.load(Ordering::SeqCst));
        assert_eq!(barrier.remaining(), 1);

        drop(tickets.pop());
        waiter.await.unwrap();
        assert!(opened.load(Ordering::SeqCst));
    }

    struct SlowCounter {
        done: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler<(u64, ChunkTicket)> for SlowCounter {
        async fn handle(&self, (delay_ms, _ticket): (u64, ChunkTicket)) {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fan_out_waits_for_every_chunk() {
        let handler = Arc::new(SlowCounter {
            done: AtomicUsize::new(0),
        });
        let pool: WorkerPool<(u64, ChunkTicket)> =
            WorkerPool::spawn("test", 3, 3, Arc::clone(&handler));

        let delays: Vec<u64> = vec![40, 5, 25, 10, 30];
        let barrier = pool
            .sender()
            .fan_out(delays, 1, |chunk, ticket| (chunk[0], ticket))
            .await
            .unwrap();
        barrier.wait().await;

        assert_eq!(handler.done.load(Ordering::SeqCst), 5);
        pool.shutdown().await;
    }

    struct Failing;

    #[async_trait]
    impl JobHandler<ChunkTicket> for Failing {
        async fn handle(&self, ticket: ChunkTicket) {
            // Dropping the ticket early counts as a terminal state.
            drop(ticket);
        }
    }

    #[tokio::test]
    async fn test_dropped_jobs_still_open_barrier() {
        let pool: WorkerPool<ChunkTicket> = WorkerPool::spawn("failing", 2, 1, Arc::new(Failing));
        let barrier = pool
            .sender()
            .fan_out(vec![1, 2, 3, 4], 2, |_, ticket| ticket)
            .await
            .unwrap();
        barrier.wait().await;
        assert_eq!(barrier.remaining(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_to_closed_queue_fails() {
        let (sender, receiver) = mpsc::channel::<u8>(1);
        drop(receiver);
        let sender = JobSender {
            pool: "closed",
            sender,
        };
        let err = sender.submit(1).await.unwrap_err();
        assert_eq!(err.to_string(), "worker pool closed is closed");
    }
}
