//! Strict-priority job scheduler
//!
//! Three FIFO queues drained by a single task, one job at a time, HIGH before
//! MEDIUM before LOW. The drain task exists only while there is work. A failed
//! job is logged and the loop moves on; retries are the caller's concern.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::error::SyncError;
use crate::logging::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
	High,
	Medium,
	Low,
}

struct Job {
	label: String,
	work: BoxFuture<'static, Result<(), SyncError>>,
}

#[derive(Default)]
struct Queues {
	high: VecDeque<Job>,
	medium: VecDeque<Job>,
	low: VecDeque<Job>,
	running: bool,
}

impl Queues {
	fn queue_mut(&mut self, priority: Priority) -> &mut VecDeque<Job> {
		match priority {
			Priority::High => &mut self.high,
			Priority::Medium => &mut self.medium,
			Priority::Low => &mut self.low,
		}
	}

	fn pop(&mut self) -> Option<Job> {
		self.high.pop_front().or_else(|| self.medium.pop_front()).or_else(|| self.low.pop_front())
	}

	fn len(&self) -> usize {
		self.high.len() + self.medium.len() + self.low.len()
	}
}

struct Inner {
	queues: Mutex<Queues>,
	idle: Notify,
}

#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

impl Default for Scheduler {
	fn default() -> Self {
		Scheduler::new()
	}
}

impl Scheduler {
	pub fn new() -> Self {
		Scheduler { inner: Arc::new(Inner { queues: Mutex::new(Queues::default()), idle: Notify::new() }) }
	}

	/// Queue a job; starts the drain task if none is running
	pub async fn enqueue<F>(&self, priority: Priority, label: impl Into<String>, work: F)
	where
		F: Future<Output = Result<(), SyncError>> + Send + 'static,
	{
		let job = Job { label: label.into(), work: work.boxed() };
		let mut queues = self.inner.queues.lock().await;
		debug!("Queued {:?} job {}", priority, job.label);
		queues.queue_mut(priority).push_back(job);

		if !queues.running {
			queues.running = true;
			tokio::spawn(drain(self.inner.clone()));
		}
	}

	/// Jobs waiting to run (the running one excluded)
	pub async fn pending(&self) -> usize {
		self.inner.queues.lock().await.len()
	}

	/// Resolves once every queue is empty and no job is running
	pub async fn wait_idle(&self) {
		loop {
			let notified = self.inner.idle.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			{
				let queues = self.inner.queues.lock().await;
				if !queues.running && queues.len() == 0 {
					return;
				}
			}
			notified.await;
		}
	}
}

async fn drain(inner: Arc<Inner>) {
	loop {
		let job = {
			let mut queues = inner.queues.lock().await;
			match queues.pop() {
				Some(job) => job,
				None => {
					queues.running = false;
					inner.idle.notify_waiters();
					return;
				}
			}
		};

		match AssertUnwindSafe(job.work).catch_unwind().await {
			Ok(Ok(())) => debug!("Job {} done", job.label),
			Ok(Err(e)) => warn!("Job {} failed: {}", job.label, e),
			Err(_) => error!("Job {} panicked", job.label),
		}
	}
}


// vim: ts=4
