// THEORY:
// Encoding and syncing an image can take longer than a frame interval. The
// write-behind worker moves that cost off the thread that drives `step()`.
//
// Shape:
// - One tokio task receives `WriteJob`s over an unbounded channel and runs each
//   blocking write on tokio's blocking pool, one at a time, in submission order.
// - Every job produces exactly one `WriteAck` on a second channel.
// - The owner drains acknowledgments whenever it likes. Nothing is counted as
//   saved until its acknowledgment has been drained and found successful.
//
// The owner side is synchronous. `drain` never blocks; `flush` blocks the
// calling thread until every in-flight job is acknowledged, so it must not be
// called from inside an async task.

use crate::core_modules::frame::Frame;
use crate::error::{Error, Result};
use crate::persistence::{PersistenceSink, StoredPath};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One artifact waiting to be written.
pub struct WriteJob {
    pub artifact: Frame,
    pub name: String,
}

/// The outcome of one `WriteJob`.
#[derive(Debug)]
pub struct WriteAck {
    pub name: String,
    pub result: Result<StoredPath>,
}

pub struct WriteBehind {
    job_sender: mpsc::UnboundedSender<WriteJob>,
    ack_receiver: mpsc::UnboundedReceiver<WriteAck>,
    in_flight: usize,
    worker: JoinHandle<()>,
}

impl WriteBehind {
    /// Spawns the worker task on `runtime`, writing through `sink`.
    pub fn spawn<S: PersistenceSink>(runtime: &Handle, sink: Arc<S>) -> Self {
        let (job_sender, mut job_receiver) = mpsc::unbounded_channel::<WriteJob>();
        let (ack_sender, ack_receiver) = mpsc::unbounded_channel::<WriteAck>();

        let worker = runtime.spawn(async move {
            while let Some(job) = job_receiver.recv().await {
                let name = job.name.clone();
                let sink = Arc::clone(&sink);
                let result = tokio::task::spawn_blocking(move || sink.write(&job.artifact, &job.name))
                    .await
                    .unwrap_or_else(|join_error| {
                        Err(Error::Write {
                            name: name.clone(),
                            reason: format!("write task failed: {join_error}"),
                        })
                    });

                if ack_sender.send(WriteAck { name, result }).is_err() {
                    // Owner dropped; nobody is left to count the result.
                    break;
                }
            }
        });

        Self {
            job_sender,
            ack_receiver,
            in_flight: 0,
            worker,
        }
    }

    /// Queues an artifact. Fails only if the worker has stopped.
    pub fn submit(&mut self, artifact: Frame, name: String) -> Result<()> {
        self.job_sender
            .send(WriteJob { artifact, name })
            .map_err(|rejected| Error::Write {
                name: rejected.0.name,
                reason: "background writer is not running".into(),
            })?;
        self.in_flight += 1;
        Ok(())
    }

    /// Returns every acknowledgment that has arrived, without waiting.
    pub fn drain(&mut self) -> Vec<WriteAck> {
        let mut acks = Vec::new();
        while let Ok(ack) = self.ack_receiver.try_recv() {
            acks.push(ack);
        }
        self.in_flight = self.in_flight.saturating_sub(acks.len());
        acks
    }

    /// Blocks until every in-flight job is acknowledged.
    pub fn flush(&mut self) -> Vec<WriteAck> {
        let mut acks = Vec::with_capacity(self.in_flight);
        while self.in_flight > 0 {
            match self.ack_receiver.blocking_recv() {
                Some(ack) => {
                    acks.push(ack);
                    self.in_flight -= 1;
                }
                None => {
                    log::warn!("Background writer stopped with {} write(s) unacknowledged", self.in_flight);
                    self.in_flight = 0;
                }
            }
        }
        acks
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}
