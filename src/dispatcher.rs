//! An ordered task queue with lifecycle states.
//!
//! Every mutation of shared telemetry state is funneled through a
//! [`Dispatcher`], which guarantees program order between public API calls
//! and provides a buffering phase for work dispatched before the SDK is
//! initialized.
//!
//! Two execution modes share one queue and state machine:
//!
//! * [`ExecutionMode::Background`] drains the queue on a dedicated worker
//!   thread, settling one task before taking the next.
//! * [`ExecutionMode::Inline`] runs tasks to completion on the calling
//!   thread whenever the dispatcher is idle, for hosts without threads to
//!   spare.

use std::collections::VecDeque;
use std::error::Error;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// How many tasks are buffered before initialization; further tasks are
/// dropped with a warning.
pub const DEFAULT_MAX_PRE_INIT_QUEUE_SIZE: usize = 100;

/// The result of a dispatched task. Failures are logged and the queue
/// moves on; only a failing init task brings the dispatcher down.
pub type TaskResult = Result<(), Box<dyn Error + Send + Sync>>;

/// The boxed unit of work handed to [`Dispatcher::launch`].
pub type Task = Box<dyn FnOnce() -> TaskResult + Send>;

enum Command {
    Task(Task),
    /// Survives [`Dispatcher::clear`]; used for work that must happen even
    /// when queued recording is being thrown away.
    PersistentTask(Task),
    /// The one task allowed to shut the dispatcher down by failing.
    InitTask(Task),
    /// A tracer for tests; resolved on execution or on queue clear.
    TestTask(SyncSender<()>),
    Stop,
    Clear,
    Shutdown,
}

/// Lifecycle states of a [`Dispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Tasks are buffered into the pre-init queue.
    Uninitialized,
    /// Waiting for work.
    Idle,
    /// A task is being executed.
    Processing,
    /// Paused; only `resume`, `clear` or `shutdown` get things moving
    /// again.
    Stopped,
    /// Terminal.
    Shutdown,
}

/// Selects where queued tasks run. See the module docs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A dedicated worker thread drains the queue.
    Background,
    /// The queue is drained on the enqueuing thread whenever idle.
    Inline,
}

struct Inner {
    state: State,
    queue: VecDeque<Command>,
    pre_init_queue: VecDeque<Command>,
    pre_init_dropped: usize,
}

struct Shared {
    inner: Mutex<Inner>,
    condvar: Condvar,
    max_pre_init_queue_size: usize,
}

impl Shared {
    /// Drops queued commands, keeping persistent tasks and shutdown, and
    /// resolves pending test tracers so tests do not deadlock.
    fn clear_queues(inner: &mut Inner) {
        for queue in [&mut inner.queue, &mut inner.pre_init_queue] {
            let kept = queue
                .drain(..)
                .filter(|command| match command {
                    Command::PersistentTask(_) | Command::Shutdown => true,
                    Command::TestTask(signal) => {
                        let _ = signal.send(());
                        false
                    }
                    _ => false,
                })
                .collect();
            *queue = kept;
        }
    }

    fn set_state(&self, state: State) {
        self.inner.lock().unwrap().state = state;
    }

    /// Executes one command. Returns `false` once the dispatcher reached
    /// its terminal state.
    fn run_command(&self, command: Command) -> bool {
        match command {
            Command::Task(task) | Command::PersistentTask(task) => {
                self.set_state(State::Processing);
                if let Err(err) = task() {
                    log::error!("Dispatched task failed, continuing: {err}");
                }
                self.set_state(State::Idle);
                true
            }
            Command::InitTask(task) => {
                self.set_state(State::Processing);
                match task() {
                    Ok(()) => {
                        self.set_state(State::Idle);
                    }
                    Err(err) => {
                        log::error!("Initialization failed, clearing the queue and shutting down: {err}");
                        let mut inner = self.inner.lock().unwrap();
                        Self::clear_queues(&mut inner);
                        inner.queue.push_back(Command::Shutdown);
                        inner.state = State::Idle;
                    }
                }
                true
            }
            Command::TestTask(signal) => {
                let _ = signal.send(());
                true
            }
            Command::Stop => {
                let mut inner = self.inner.lock().unwrap();
                match inner.state {
                    State::Idle | State::Processing => inner.state = State::Stopped,
                    state => log::error!("Cannot stop the dispatcher while {state:?}"),
                }
                true
            }
            Command::Clear => {
                let mut inner = self.inner.lock().unwrap();
                Self::clear_queues(&mut inner);
                true
            }
            Command::Shutdown => {
                let persistent: Vec<Task> = {
                    let mut guard = self.inner.lock().unwrap();
                    let inner = &mut *guard;
                    inner.state = State::Shutdown;
                    inner
                        .queue
                        .drain(..)
                        .chain(inner.pre_init_queue.drain(..))
                        .filter_map(|command| match command {
                            Command::PersistentTask(task) => Some(task),
                            Command::TestTask(signal) => {
                                let _ = signal.send(());
                                None
                            }
                            _ => None,
                        })
                        .collect()
                };
                for task in persistent {
                    if let Err(err) = task() {
                        log::error!("Persistent task failed during shutdown: {err}");
                    }
                }
                self.condvar.notify_all();
                false
            }
        }
    }
}

/// Serializes all mutating work into a single logical execution order.
pub struct Dispatcher {
    shared: Arc<Shared>,
    mode: ExecutionMode,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher in the [`State::Uninitialized`] state.
    pub fn new(mode: ExecutionMode, max_pre_init_queue_size: usize) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: State::Uninitialized,
                queue: VecDeque::new(),
                pre_init_queue: VecDeque::new(),
                pre_init_dropped: 0,
            }),
            condvar: Condvar::new(),
            max_pre_init_queue_size,
        });

        let worker = match mode {
            ExecutionMode::Background => {
                let shared = shared.clone();
                thread::Builder::new()
                    .name("telemetry-dispatcher".into())
                    .spawn(move || worker_loop(shared))
                    .ok()
            }
            ExecutionMode::Inline => None,
        };

        Self {
            shared,
            mode,
            worker: Mutex::new(worker),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.inner.lock().unwrap().state
    }

    pub(crate) fn pre_init_overflow_count(&self) -> usize {
        self.shared.inner.lock().unwrap().pre_init_dropped
    }

    /// Enqueues a task at the tail of the queue.
    pub fn launch(&self, task: impl FnOnce() -> TaskResult + Send + 'static) {
        self.enqueue(Command::Task(Box::new(task)), false);
    }

    /// Enqueues a task that survives [`Dispatcher::clear`].
    pub fn launch_persistent(&self, task: impl FnOnce() -> TaskResult + Send + 'static) {
        self.enqueue(Command::PersistentTask(Box::new(task)), false);
    }

    /// Transitions out of the buffering phase: queues the given init task,
    /// then everything buffered so far, and starts execution.
    pub fn flush_init_with(&self, task: impl FnOnce() -> TaskResult + Send + 'static) {
        self.flush_init_inner(Some(Box::new(task)));
    }

    /// [`Dispatcher::flush_init_with`] without an init task.
    pub fn flush_init(&self) {
        self.flush_init_inner(None);
    }

    fn flush_init_inner(&self, init: Option<Task>) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state != State::Uninitialized {
                log::error!("The dispatcher was already initialized, ignoring flush");
                return;
            }
            inner.state = State::Idle;
            let buffered: Vec<Command> = inner.pre_init_queue.drain(..).collect();
            if let Some(task) = init {
                inner.queue.push_back(Command::InitTask(task));
            }
            inner.queue.extend(buffered);
            if inner.pre_init_dropped > 0 {
                log::warn!(
                    "{} tasks were dropped before initialization because the buffer was full",
                    inner.pre_init_dropped
                );
            }
        }
        self.kick();
    }

    /// Pauses execution after the in-flight task settles.
    pub fn stop(&self) {
        self.enqueue(Command::Stop, true);
    }

    /// Resumes a stopped dispatcher.
    pub fn resume(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                State::Stopped => inner.state = State::Idle,
                state => {
                    log::error!("Cannot resume the dispatcher while {state:?}");
                    return;
                }
            }
        }
        self.kick();
    }

    /// Drops queued commands, keeping persistent tasks and shutdown. The
    /// in-flight task settles first.
    pub fn clear(&self) {
        let cleared_pre_init = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state == State::Uninitialized {
                Shared::clear_queues(&mut inner);
                true
            } else {
                false
            }
        };
        if !cleared_pre_init {
            self.enqueue(Command::Clear, true);
        }
    }

    /// Gracefully terminates the dispatcher: queued work before the
    /// shutdown command still runs, later launches are dropped.
    /// Irreversible.
    pub fn shutdown(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                State::Shutdown => return,
                State::Uninitialized => {
                    // Nothing ever ran; drop the buffer and terminate.
                    Shared::clear_queues(&mut inner);
                    inner.pre_init_queue.clear();
                    inner.state = State::Shutdown;
                }
                // A stopped queue will not drain, so terminate ahead of
                // whatever is parked in it.
                State::Stopped => inner.queue.push_front(Command::Shutdown),
                _ => inner.queue.push_back(Command::Shutdown),
            }
        }
        self.kick();
        self.join();
    }

    /// Blocks until every task queued before this call has settled.
    pub fn block_on_queue(&self) {
        let (sender, receiver) = sync_channel(1);
        self.enqueue(Command::TestTask(sender), false);
        let _ = receiver.recv();
    }

    fn enqueue(&self, command: Command, priority: bool) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                State::Shutdown => {
                    if let Command::TestTask(signal) = command {
                        let _ = signal.send(());
                    } else {
                        log::warn!("Dispatcher is shut down, dropping task");
                    }
                    return;
                }
                State::Uninitialized => {
                    match command {
                        // Lifecycle commands cannot buffer meaningfully.
                        Command::Stop | Command::Clear | Command::Shutdown => {
                            log::error!("Lifecycle command before initialization is a no-op");
                            return;
                        }
                        Command::TestTask(_) => inner.pre_init_queue.push_back(command),
                        _ => {
                            if inner.pre_init_queue.len() >= self.shared.max_pre_init_queue_size {
                                inner.pre_init_dropped += 1;
                                log::warn!("Pre-init task buffer full, dropping task");
                                return;
                            }
                            inner.pre_init_queue.push_back(command);
                        }
                    }
                    return;
                }
                _ => {
                    if priority {
                        inner.queue.push_front(command);
                    } else {
                        inner.queue.push_back(command);
                    }
                }
            }
        }
        self.kick();
    }

    /// Wakes the worker, or drains inline.
    fn kick(&self) {
        match self.mode {
            ExecutionMode::Background => self.shared.condvar.notify_all(),
            ExecutionMode::Inline => self.drain_inline(),
        }
    }

    fn drain_inline(&self) {
        loop {
            let command = {
                let mut inner = self.shared.inner.lock().unwrap();
                // `Processing` here means a running task re-entered the
                // dispatcher; the active drain will pick its work up. A
                // stopped queue only lets a head shutdown through, like
                // the worker loop does.
                let ready = match inner.state {
                    State::Idle => !inner.queue.is_empty(),
                    State::Stopped => matches!(inner.queue.front(), Some(Command::Shutdown)),
                    _ => false,
                };
                if !ready {
                    return;
                }
                inner.queue.pop_front().unwrap()
            };
            if !self.shared.run_command(command) {
                return;
            }
        }
    }

    fn join(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("The dispatcher worker panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.state() != State::Shutdown {
            self.shutdown();
        }
        self.join();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let command = {
            let mut inner = shared.inner.lock().unwrap();
            loop {
                let ready = match inner.state {
                    State::Shutdown => return,
                    State::Uninitialized => false,
                    // Only a shutdown placed at the head (see
                    // `Dispatcher::shutdown`) may pass a stopped queue.
                    State::Stopped => matches!(inner.queue.front(), Some(Command::Shutdown)),
                    _ => !inner.queue.is_empty(),
                };
                if ready {
                    break;
                }
                inner = shared.condvar.wait(inner).unwrap();
            }
            inner.queue.pop_front().unwrap()
        };
        if !shared.run_command(command) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn background() -> Dispatcher {
        Dispatcher::new(ExecutionMode::Background, DEFAULT_MAX_PRE_INIT_QUEUE_SIZE)
    }

    #[test]
    fn tasks_run_in_program_order() {
        let dispatcher = background();
        let order = Arc::new(Mutex::new(Vec::new()));
        dispatcher.flush_init();
        for i in 0..10 {
            let order = order.clone();
            dispatcher.launch(move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        dispatcher.block_on_queue();
        assert_eq!((0..10).collect::<Vec<_>>(), *order.lock().unwrap());
    }

    #[test]
    fn pre_init_tasks_run_after_the_init_task() {
        let dispatcher = background();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 1..4 {
            let order = order.clone();
            dispatcher.launch(move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        let order_for_init = order.clone();
        dispatcher.flush_init_with(move || {
            order_for_init.lock().unwrap().push(0);
            Ok(())
        });
        dispatcher.block_on_queue();
        assert_eq!(vec![0, 1, 2, 3], *order.lock().unwrap());
    }

    #[test]
    fn pre_init_buffer_overflow_drops_tasks() {
        let dispatcher = Dispatcher::new(ExecutionMode::Background, 3);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            dispatcher.launch(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        dispatcher.flush_init();
        dispatcher.block_on_queue();
        assert_eq!(3, counter.load(Ordering::SeqCst));
        assert_eq!(7, dispatcher.pre_init_overflow_count());
    }

    #[test]
    fn a_failing_task_does_not_stop_the_queue() {
        let dispatcher = background();
        dispatcher.flush_init();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.launch(|| Err("nope".into()));
        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.block_on_queue();
        assert_eq!(1, counter.load(Ordering::SeqCst));
        assert_eq!(State::Idle, dispatcher.state());
    }

    #[test]
    fn a_failing_init_task_shuts_the_dispatcher_down() {
        let dispatcher = background();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.flush_init_with(|| Err("init exploded".into()));
        dispatcher.block_on_queue();
        assert_eq!(State::Shutdown, dispatcher.state());
        assert_eq!(0, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn clear_drops_queued_tasks_but_keeps_persistent_ones() {
        let dispatcher = background();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.flush_init();
        dispatcher.stop();
        for _ in 0..3 {
            let counter = counter.clone();
            dispatcher.launch(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let counter_clone = counter.clone();
        dispatcher.launch_persistent(move || {
            counter_clone.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.clear();
        dispatcher.resume();
        dispatcher.block_on_queue();
        assert_eq!(10, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_and_resume_pause_execution() {
        let dispatcher = background();
        dispatcher.flush_init();
        dispatcher.stop();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // Give a broken dispatcher a chance to misbehave.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(0, counter.load(Ordering::SeqCst));
        dispatcher.resume();
        dispatcher.block_on_queue();
        assert_eq!(1, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_runs_queued_work_then_drops_later_launches() {
        let dispatcher = background();
        dispatcher.flush_init();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.shutdown();
        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.block_on_queue();
        assert_eq!(1, counter.load(Ordering::SeqCst));
        assert_eq!(State::Shutdown, dispatcher.state());
    }

    #[test]
    fn inline_mode_runs_tasks_on_the_calling_thread() {
        let dispatcher = Dispatcher::new(ExecutionMode::Inline, DEFAULT_MAX_PRE_INIT_QUEUE_SIZE);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // Still buffered.
        assert_eq!(0, counter.load(Ordering::SeqCst));
        dispatcher.flush_init();
        assert_eq!(1, counter.load(Ordering::SeqCst));

        let counter_clone = counter.clone();
        dispatcher.launch(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(2, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn inline_mode_supports_reentrant_launches() {
        let dispatcher = Arc::new(Dispatcher::new(
            ExecutionMode::Inline,
            DEFAULT_MAX_PRE_INIT_QUEUE_SIZE,
        ));
        dispatcher.flush_init();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_outer = counter.clone();
        let dispatcher_clone = dispatcher.clone();
        dispatcher.launch(move || {
            let counter_inner = counter_outer.clone();
            dispatcher_clone.launch(move || {
                counter_inner.fetch_add(10, Ordering::SeqCst);
                Ok(())
            });
            // The nested task must not have run inside us.
            assert_eq!(0, counter_outer.load(Ordering::SeqCst));
            counter_outer.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(11, counter.load(Ordering::SeqCst));
    }
}
