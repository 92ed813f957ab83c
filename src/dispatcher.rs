//! Thread-affine callback dispatch.
//!
//! A [`Dispatcher`] knows which thread owns the UI and marshals callbacks
//! onto it. The owner is either a dedicated thread started with
//! [`Dispatcher::spawn_owner`], or a host thread that calls
//! [`Dispatcher::attach_current_thread`] and pumps the returned
//! [`OwnerLoop`] from its own event loop.
//!
//! Messages travel over a bounded `mpsc` channel and the owner processes them
//! sequentially, exactly like an actor that exclusively owns its state.

use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::error::DispatchError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Messages delivered to the owning thread.
pub(crate) enum OwnerMessage {
    /// Run a marshaled callback.
    Run(Job),
    /// Stop the owner loop after the callbacks queued before this message.
    Shutdown,
}

/// Configuration for the owning thread and its queue.
///
/// # Examples
///
/// ```
/// use mvvm_states::DispatcherConfig;
///
/// let config = DispatcherConfig {
///     thread_name: "ui".to_string(),
///     ..DispatcherConfig::default()
/// };
/// assert_eq!(config.queue_capacity, 32);
/// ```
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name given to a thread started by [`Dispatcher::spawn_owner`].
    ///
    /// Default: `"mvvm-owner"`.
    pub thread_name: String,

    /// Number of callbacks that may wait for the owner before senders block
    /// (or, for [`Dispatcher::post`], before callbacks are dropped).
    ///
    /// Default: 32.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "mvvm-owner".to_string(),
            queue_capacity: 32,
        }
    }
}

#[derive(Clone)]
struct OwnerLink {
    thread: ThreadId,
    sender: mpsc::Sender<OwnerMessage>,
    generation: u64,
}

struct Shared {
    config: DispatcherConfig,
    owner: RwLock<Option<OwnerLink>>,
    generations: AtomicU64,
}

/// Marshals callbacks onto the owning (UI) thread.
///
/// `Clone` is cheap; clones share the same owner.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread_name", &self.shared.config.thread_name)
            .field("has_owner", &self.has_owner())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Dispatcher {
    /// Create a dispatcher with no owning thread yet.
    ///
    /// Callbacks marshaled before an owner exists are dropped.
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                owner: RwLock::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this dispatcher was created with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Whether an owning thread is currently attached.
    pub fn has_owner(&self) -> bool {
        self.link().is_some()
    }

    /// Whether the calling thread is the owning thread.
    pub fn check_access(&self) -> bool {
        self.link()
            .is_some_and(|link| link.thread == thread::current().id())
    }

    /// Run `callback` on the owning thread and wait for it to finish.
    ///
    /// Runs inline when called on the owning thread. Otherwise the callback
    /// is queued and the caller blocks until the owner has run it, so that
    /// side effects of the callback are visible when this returns.
    ///
    /// When no owner is attached the callback is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called off the owning thread from within an asynchronous
    /// execution context; use [`invoke`](Dispatcher::invoke) there.
    pub fn run_on_owner<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(link) = self.link() else {
            tracing::warn!("no owning thread attached, dropping callback");
            return;
        };
        if link.thread == thread::current().id() {
            callback();
            return;
        }

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let job: Job = Box::new(move || {
            callback();
            let _ = done_tx.send(());
        });
        if link.sender.blocking_send(OwnerMessage::Run(job)).is_err() {
            tracing::warn!("owning thread has exited, dropping callback");
            return;
        }
        // An error here means the owner dropped the job unfinished.
        if done_rx.blocking_recv().is_err() {
            tracing::warn!("owning thread exited before completing callback");
        }
    }

    /// Queue `callback` on the owning thread without waiting.
    ///
    /// Runs inline when called on the owning thread. Dropped (with a warning)
    /// when no owner is attached or the owner's queue is full.
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(link) = self.link() else {
            tracing::warn!("no owning thread attached, dropping posted callback");
            return;
        };
        if link.thread == thread::current().id() {
            callback();
            return;
        }

        match link.sender.try_send(OwnerMessage::Run(Box::new(callback))) {
            Ok(()) => tracing::trace!("posted callback to owning thread"),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    capacity = self.shared.config.queue_capacity,
                    "owner queue is full, dropping posted callback"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("owning thread has exited, dropping posted callback");
            }
        }
    }

    /// Run `callback` on the owning thread and await its result.
    ///
    /// The async counterpart of [`run_on_owner`](Dispatcher::run_on_owner),
    /// for callers that live inside an async runtime.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::NoOwner`] -- no owning thread is attached.
    /// * [`DispatchError::OwnerGone`] -- the owner exited before the
    ///   callback completed.
    pub async fn invoke<F, R>(&self, callback: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let link = self.link().ok_or(DispatchError::NoOwner)?;
        if link.thread == thread::current().id() {
            return Ok(callback());
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(callback());
        });
        link.sender
            .send(OwnerMessage::Run(job))
            .await
            .map_err(|_| DispatchError::OwnerGone)?;
        rx.await.map_err(|_| DispatchError::OwnerGone)
    }

    /// Make the calling thread the owner.
    ///
    /// The host must pump the returned [`OwnerLoop`] so that callbacks
    /// marshaled from other threads get to run. Replaces any previous owner.
    pub fn attach_current_thread(&self) -> OwnerLoop {
        let (sender, receiver) = mpsc::channel(self.shared.config.queue_capacity.max(1));
        let generation = self.install(thread::current().id(), sender);
        tracing::debug!(generation, "current thread attached as owner");
        OwnerLoop {
            dispatcher: self.clone(),
            receiver,
            generation,
            _not_send: PhantomData,
        }
    }

    /// Detach whichever thread is the owner and ask its loop to stop.
    ///
    /// A thread blocked in [`OwnerLoop::run`] returns after the callbacks
    /// queued before this call have run. Callbacks marshaled afterwards are
    /// dropped until a new owner is attached.
    ///
    /// # Returns
    ///
    /// `false` when no owner was attached.
    pub fn release_owner(&self) -> bool {
        let link = self
            .shared
            .owner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(link) = link else {
            return false;
        };
        // A full queue still ends the loop once this last sender is dropped.
        let _ = link.sender.try_send(OwnerMessage::Shutdown);
        tracing::debug!(generation = link.generation, "owner released");
        true
    }

    /// Start a dedicated owning thread.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if the operating system refuses to spawn the
    /// thread.
    pub fn spawn_owner(&self) -> io::Result<OwnerThread> {
        let (sender, receiver) = mpsc::channel(self.shared.config.queue_capacity.max(1));
        let name = self.shared.config.thread_name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_owner_loop(receiver))?;
        let generation = self.install(join.thread().id(), sender);
        tracing::info!(thread = %name, "owner thread started");
        Ok(OwnerThread {
            dispatcher: self.clone(),
            generation,
            join: Some(join),
        })
    }

    fn install(&self, thread: ThreadId, sender: mpsc::Sender<OwnerMessage>) -> u64 {
        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut owner = self
            .shared
            .owner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if owner.is_some() {
            tracing::warn!("replacing existing owning thread");
        }
        *owner = Some(OwnerLink {
            thread,
            sender,
            generation,
        });
        generation
    }

    /// Detach the owner installed as `generation`, if it is still current.
    fn uninstall(&self, generation: u64) -> Option<OwnerLink> {
        let mut owner = self
            .shared
            .owner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if owner.as_ref().is_some_and(|link| link.generation == generation) {
            owner.take()
        } else {
            None
        }
    }

    fn link(&self) -> Option<OwnerLink> {
        self.shared
            .owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Owner loop body for a dedicated thread.
///
/// Exits on `Shutdown` or when every sender is gone.
fn run_owner_loop(mut receiver: mpsc::Receiver<OwnerMessage>) {
    while let Some(message) = receiver.blocking_recv() {
        match message {
            OwnerMessage::Run(job) => job(),
            OwnerMessage::Shutdown => break,
        }
    }
    tracing::info!("owner thread stopped");
}

/// Message pump for a host thread that became the owner through
/// [`Dispatcher::attach_current_thread`].
///
/// Not `Send`: it must stay on the thread it was created on. Dropping it
/// detaches that thread as owner.
pub struct OwnerLoop {
    dispatcher: Dispatcher,
    receiver: mpsc::Receiver<OwnerMessage>,
    generation: u64,
    _not_send: PhantomData<Rc<()>>,
}

impl OwnerLoop {
    /// Run every callback queued so far without blocking.
    ///
    /// # Returns
    ///
    /// The number of callbacks run.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                OwnerMessage::Run(job) => {
                    job();
                    ran += 1;
                }
                OwnerMessage::Shutdown => break,
            }
        }
        ran
    }

    /// Block the current thread, running callbacks until the dispatcher
    /// loses this owner.
    ///
    /// The loop ends when [`Dispatcher::release_owner`] is called from
    /// another thread (or from a callback), or when another thread becomes
    /// the owner. Call it on a thread that does nothing but pump callbacks;
    /// a UI thread with its own event loop uses
    /// [`run_pending`](OwnerLoop::run_pending) instead.
    pub fn run(mut self) {
        while let Some(message) = self.receiver.blocking_recv() {
            match message {
                OwnerMessage::Run(job) => job(),
                OwnerMessage::Shutdown => break,
            }
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Drop for OwnerLoop {
    fn drop(&mut self) {
        if self.dispatcher.uninstall(self.generation).is_some() {
            tracing::debug!(generation = self.generation, "owner thread detached");
        }
    }
}

impl fmt::Debug for OwnerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerLoop")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Handle to a dedicated owning thread.
///
/// Dropping the handle detaches the owner and lets the thread wind down once
/// the queued callbacks have run; call [`shutdown`](OwnerThread::shutdown) to
/// also wait for it.
pub struct OwnerThread {
    dispatcher: Dispatcher,
    generation: u64,
    join: Option<JoinHandle<()>>,
}

impl OwnerThread {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Detach the owner, let queued callbacks finish, and join the thread.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if the owning thread panicked.
    pub fn shutdown(mut self) -> io::Result<()> {
        self.stop(true)
    }

    fn stop(&mut self, wait: bool) -> io::Result<()> {
        let link = self.dispatcher.uninstall(self.generation);
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        if join.thread().id() == thread::current().id() {
            // Shutdown requested from inside a callback; the loop ends once
            // the channel drains.
            return Ok(());
        }
        if let Some(link) = link {
            let _ = link.sender.try_send(OwnerMessage::Shutdown);
        }
        if wait {
            join.join()
                .map_err(|_| io::Error::other("owner thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for OwnerThread {
    fn drop(&mut self) {
        let _ = self.stop(false);
    }
}

impl fmt::Debug for OwnerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerThread")
            .field("generation", &self.generation)
            .field("running", &self.join.is_some())
            .finish()
    }
}
