//! Node lifecycle: one worker task driving one [`NodeBehavior`].
//!
//! ```text
//!  Terminated ──run──► Stopped ◄──pause/stop/idle/error── Running
//!      ▲                  │                                  ▲
//!      └──── terminate ───┴───────────────run────────────────┘
//! ```
//!
//! `Terminated` is the initial state: no worker exists and nothing is
//! spawned until the first run. Lifecycle requests are coalesced in a single
//! slot (a pending terminate is never overwritten) and, like urgent
//! commands, interrupt the step in progress. Ordinary commands wait in a
//! bounded mailbox and are handled between steps; a pause, stop or
//! terminate also cuts short a command handler.
//!
//! Because a step can be cancelled at any await point, behaviors keep
//! in-flight packets in their own state (see
//! [`EventRing::push_from`](crate::event_ring::EventRing::push_from)) rather
//! than in step locals.

use alloc::sync::Arc;
use core::cell::RefCell;
use core::future::{poll_fn, Future};
use core::pin::{pin, Pin};
use core::task::Poll;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::config::PipelineConfig;
use crate::error::StreamError;
use crate::event_signal::{Conditions, EventSignal, Trigger};
use crate::packet::StreamId;
use crate::pipeline::{boxed, NodeEvent, NodeId, PipelineHandle};
use crate::spawner::SpawnError;
use crate::timeout::Timeout;

/// Depth of a node's command mailbox.
pub const MAILBOX_DEPTH: usize = 4;

/// Owner tasks that may wait on one node at the same time.
const MAX_OWNER_WAITERS: usize = 4;

/// A lifecycle request or urgent command is pending.
const INTERRUPT: Conditions = Conditions::bit(0);
/// An ordinary command was posted.
const MAIL: Conditions = Conditions::bit(1);

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeState {
    /// No worker; initial and final state.
    Terminated,
    /// Worker alive and idle.
    Stopped,
    /// Worker calling `step` in a loop.
    Running,
}

impl NodeState {
    /// Short lowercase name for log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

/// Outcome of one [`NodeBehavior::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work may be available; step again.
    Continue,
    /// Nothing left to do; go to `Stopped` until told otherwise.
    Idle,
}

/// State change requested by a command handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep the current state.
    Stay,
    /// Enter `Running`.
    Run,
    /// Enter `Stopped` without flushing.
    Stop,
}

/// Per-node logic run by the worker.
///
/// `step` may be cancelled at any await point by a lifecycle request or an
/// urgent command, and is called again later; it must leave `self`
/// consistent at every suspension.
pub trait NodeBehavior: Send + 'static {
    /// Node-specific commands accepted through the mailbox.
    type Command: Send + 'static;

    /// Perform one unit of work.
    ///
    /// Returning an error other than [`StreamError::Stopped`] reports it to
    /// the control plane and stops the node.
    fn step(&mut self, ctx: &NodeContext) -> impl Future<Output = Result<Step, StreamError>> + Send;

    /// Handle one command.
    ///
    /// Like `step`, cancelled at any await point by a lifecycle request.
    fn on_command(&mut self, cmd: Self::Command, ctx: &NodeContext) -> impl Future<Output = Transition> + Send;

    /// Entering `Running`.
    fn on_run(&mut self, _ctx: &NodeContext) {}

    /// Leaving `Running`, or told to stop; `flush` discards buffered data.
    fn on_stop(&mut self, _flush: bool, _ctx: &NodeContext) {}

    /// The worker is about to exit.
    fn on_terminate(&mut self, _ctx: &NodeContext) {}
}

/// What a behavior knows about the node it runs in.
#[derive(Clone)]
pub struct NodeContext {
    id: NodeId,
    name: &'static str,
    pipeline: PipelineHandle,
}

impl NodeContext {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Mint a stream id.
    pub fn next_stream_id(&self) -> StreamId {
        self.pipeline.next_stream_id()
    }

    /// Publish an event to the application.
    pub fn emit(&self, event: NodeEvent) {
        self.pipeline.emit(self.id, self.name, event);
    }

    /// Report a failure; the control plane decides its disposition.
    pub fn report_error(&self, error: StreamError) {
        self.emit(NodeEvent::Error {
            error,
            disposition: crate::pipeline::Disposition::Transient,
        });
    }
}

// ── Shared state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Run,
    Pause,
    Stop,
    Terminate,
}

struct Slot {
    state: NodeState,
    /// Incremented on every state change, for edge-triggered waits.
    transitions: u32,
    request: Option<Request>,
    posted: u32,
    done: u32,
    alive: bool,
    owners: MultiWakerRegistration<MAX_OWNER_WAITERS>,
}

/// `true` once counter `done` has reached `ticket`.
fn reached(done: u32, ticket: u32) -> bool {
    done.wrapping_sub(ticket) < u32::MAX / 2
}

struct NodeInner<B: NodeBehavior> {
    ctx: NodeContext,
    slot: Mutex<CriticalSectionRawMutex, RefCell<Slot>>,
    wake: EventSignal,
    mailbox: Channel<CriticalSectionRawMutex, B::Command, MAILBOX_DEPTH>,
    /// The behavior while no worker owns it.
    parked: Mutex<CriticalSectionRawMutex, RefCell<Option<B>>>,
}

impl<B: NodeBehavior> NodeInner<B> {
    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot) -> R) -> R {
        self.slot.lock(|c| f(&mut c.borrow_mut()))
    }

    fn state(&self) -> NodeState {
        self.with_slot(|s| s.state)
    }

    fn set_state(&self, state: NodeState) {
        self.with_slot(|s| {
            if s.state != state {
                s.state = state;
                s.transitions = s.transitions.wrapping_add(1);
                s.owners.wake();
            }
        });
    }

    /// Queue `req` for the live worker. Returns its ticket.
    fn post(&self, req: Request) -> u32 {
        let ticket = self.with_slot(|s| {
            if s.request != Some(Request::Terminate) {
                s.request = Some(req);
            }
            s.posted = s.posted.wrapping_add(1);
            s.posted
        });
        self.wake.set(INTERRUPT);
        ticket
    }

    /// A pause, stop or terminate is waiting.
    fn halt_pending(&self) -> bool {
        self.with_slot(|s| matches!(s.request, Some(Request::Pause | Request::Stop | Request::Terminate)))
    }

    fn take_request(&self) -> Option<(Request, u32)> {
        self.with_slot(|s| s.request.take().map(|r| (r, s.posted)))
    }

    fn finish_request(&self, ticket: u32) {
        self.with_slot(|s| {
            s.done = ticket;
            s.owners.wake();
        });
    }

    fn request_run(self: &Arc<Self>) -> Result<Option<u32>, SpawnError> {
        let spawn = self.with_slot(|s| {
            if s.alive {
                return false;
            }
            s.alive = true;
            s.request = Some(Request::Run);
            s.posted = s.posted.wrapping_add(1);
            true
        });
        if !spawn {
            return Ok(Some(self.post(Request::Run)));
        }
        let ticket = self.with_slot(|s| s.posted);
        let inner = Arc::clone(self);
        let spawned = self.ctx.pipeline.spawner().spawn(
            self.ctx.name,
            alloc::boxed::Box::pin(async move {
                let behavior = inner.parked.lock(|p| p.borrow_mut().take());
                match behavior {
                    Some(behavior) => worker(&inner, behavior).await,
                    None => inner.exit(),
                }
            }),
        );
        if let Err(e) = spawned {
            warn!("node {}: worker spawn failed", self.ctx.name);
            self.exit();
            return Err(e);
        }
        debug!("node {}: worker spawned", self.ctx.name);
        Ok(Some(ticket))
    }

    /// Lifecycle request that is a no-op without a worker.
    fn request_live(&self, req: Request) -> Option<u32> {
        if !self.with_slot(|s| s.alive) {
            return None;
        }
        Some(self.post(req))
    }

    fn exit(&self) {
        self.with_slot(|s| {
            s.alive = false;
            s.request = None;
            s.done = s.posted;
            if s.state != NodeState::Terminated {
                s.state = NodeState::Terminated;
                s.transitions = s.transitions.wrapping_add(1);
            }
            s.owners.wake();
        });
    }

    async fn wait_done(&self, ticket: u32) {
        poll_fn(|cx| {
            self.with_slot(|s| {
                if !s.alive || reached(s.done, ticket) {
                    return Poll::Ready(());
                }
                s.owners.register(cx.waker());
                Poll::Pending
            })
        })
        .await;
    }

    async fn join(&self, timeout: Timeout) -> Result<(), StreamError> {
        let ticket = self.with_slot(|s| s.posted);
        timeout.deadline().run(self.wait_done(ticket)).await
    }
}

// ── Worker ───────────────────────────────────────────────────────────────────

async fn worker<B: NodeBehavior>(inner: &NodeInner<B>, mut behavior: B) {
    let ctx = &inner.ctx;
    let mut state = NodeState::Stopped;
    inner.set_state(state);

    loop {
        if let Some((req, ticket)) = inner.take_request() {
            if req == Request::Terminate {
                break;
            }
            state = match (req, state) {
                (Request::Run, NodeState::Stopped) => {
                    behavior.on_run(ctx);
                    NodeState::Running
                }
                (Request::Pause, NodeState::Running) => {
                    behavior.on_stop(false, ctx);
                    NodeState::Stopped
                }
                (Request::Stop, _) => {
                    behavior.on_stop(true, ctx);
                    NodeState::Stopped
                }
                (_, current) => current,
            };
            inner.set_state(state);
            inner.finish_request(ticket);
            trace!("node {}: {}", ctx.name, state.as_str());
            continue;
        }

        if let Ok(cmd) = inner.mailbox.try_receive() {
            let Some(transition) = handle_command(inner, &mut behavior, cmd).await else {
                debug!("node {}: command cut short", ctx.name);
                continue;
            };
            state = match (transition, state) {
                (Transition::Run, NodeState::Stopped) => {
                    behavior.on_run(ctx);
                    NodeState::Running
                }
                (Transition::Stop, NodeState::Running) => {
                    behavior.on_stop(false, ctx);
                    NodeState::Stopped
                }
                (_, current) => current,
            };
            inner.set_state(state);
            continue;
        }

        if state != NodeState::Running {
            inner.wake.wait(INTERRUPT | MAIL, Trigger::Edge).await;
            continue;
        }

        let outcome = select(inner.wake.wait(INTERRUPT, Trigger::Edge), behavior.step(ctx)).await;
        match outcome {
            Either::First(_) | Either::Second(Ok(Step::Continue)) => {}
            Either::Second(Ok(Step::Idle)) => {
                behavior.on_stop(false, ctx);
                state = NodeState::Stopped;
                inner.set_state(state);
            }
            Either::Second(Err(StreamError::Stopped)) => {
                // the owner is tearing down; wait for its request
                inner.wake.wait(INTERRUPT | MAIL, Trigger::Edge).await;
            }
            Either::Second(Err(e)) => {
                warn!("node {}: {}", ctx.name, e.as_str());
                ctx.report_error(e);
                behavior.on_stop(false, ctx);
                state = NodeState::Stopped;
                inner.set_state(state);
            }
        }
    }

    behavior.on_terminate(ctx);
    inner.parked.lock(|p| *p.borrow_mut() = Some(behavior));
    inner.exit();
    debug!("node {}: worker exited", ctx.name);
}

/// Run one command handler. `None` when a pause, stop or terminate cut it
/// short; run requests and urgent commands wait for it to finish.
async fn handle_command<B: NodeBehavior>(inner: &NodeInner<B>, behavior: &mut B, cmd: B::Command) -> Option<Transition> {
    let mut handler = pin!(behavior.on_command(cmd, &inner.ctx));
    loop {
        match select(inner.wake.wait(INTERRUPT, Trigger::Edge), handler.as_mut()).await {
            Either::First(_) if inner.halt_pending() => return None,
            Either::First(_) => {}
            Either::Second(transition) => return Some(transition),
        }
    }
}

// ── Owner handle ─────────────────────────────────────────────────────────────

/// Owner-side handle of a node. Cloning shares the node.
pub struct Node<B: NodeBehavior> {
    inner: Arc<NodeInner<B>>,
}

impl<B: NodeBehavior> Clone for Node<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: NodeBehavior> Node<B> {
    pub(crate) fn new(id: NodeId, name: &'static str, behavior: B, pipeline: PipelineHandle) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                ctx: NodeContext { id, name, pipeline },
                slot: Mutex::new(RefCell::new(Slot {
                    state: NodeState::Terminated,
                    transitions: 0,
                    request: None,
                    posted: 0,
                    done: 0,
                    alive: false,
                    owners: MultiWakerRegistration::new(),
                })),
                wake: EventSignal::new(Conditions::NONE),
                mailbox: Channel::new(),
                parked: Mutex::new(RefCell::new(Some(behavior))),
            }),
        }
    }

    /// Object-safe control handle for the pipeline registry.
    pub fn control(&self) -> Arc<dyn NodeControl> {
        Arc::new(Arc::clone(&self.inner))
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.inner.ctx.id
    }

    /// Node name.
    pub fn name(&self) -> &'static str {
        self.inner.ctx.name
    }

    /// Current state.
    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    /// Enter `Running`, spawning the worker if there is none.
    ///
    /// # Errors
    ///
    /// [`SpawnError`] when a worker was needed but could not be started.
    pub async fn run(&self) -> Result<(), SpawnError> {
        if let Some(ticket) = self.inner.request_run()? {
            self.inner.wait_done(ticket).await;
        }
        Ok(())
    }

    /// Enter `Stopped`, keeping buffered data. No-op when `Terminated`.
    pub async fn pause(&self) {
        if let Some(ticket) = self.inner.request_live(Request::Pause) {
            self.inner.wait_done(ticket).await;
        }
    }

    /// Enter `Stopped`, discarding buffered data. No-op when `Terminated`.
    pub async fn stop(&self) {
        if let Some(ticket) = self.inner.request_live(Request::Stop) {
            self.inner.wait_done(ticket).await;
        }
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    ///
    /// Interrupts any step in progress, including one blocked on an empty
    /// queue. The behavior is kept so the node can be run again.
    pub async fn terminate(&self) {
        if let Some(ticket) = self.inner.request_live(Request::Terminate) {
            self.inner.wait_done(ticket).await;
        }
    }

    /// Non-blocking first phase of [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// [`SpawnError`] when a worker was needed but could not be started.
    pub fn request_run(&self) -> Result<(), SpawnError> {
        self.inner.request_run().map(|_| ())
    }

    /// Non-blocking first phase of [`pause`](Self::pause).
    pub fn request_pause(&self) {
        self.inner.request_live(Request::Pause);
    }

    /// Non-blocking first phase of [`stop`](Self::stop).
    pub fn request_stop(&self) {
        self.inner.request_live(Request::Stop);
    }

    /// Non-blocking first phase of [`terminate`](Self::terminate).
    pub fn request_terminate(&self) {
        self.inner.request_live(Request::Terminate);
    }

    /// Wait until every request posted so far has been processed.
    ///
    /// # Errors
    ///
    /// [`StreamError::Timeout`].
    pub async fn join(&self, timeout: Timeout) -> Result<(), StreamError> {
        self.inner.join(timeout).await
    }

    /// Wait for the node to be in one of `states`.
    ///
    /// [`Trigger::Level`] returns at once if it already is; [`Trigger::Edge`]
    /// waits for the next transition into the set.
    ///
    /// # Errors
    ///
    /// [`StreamError::Timeout`].
    pub async fn wait_for_state(
        &self,
        states: &[NodeState],
        trigger: Trigger,
        timeout: Timeout,
    ) -> Result<NodeState, StreamError> {
        let since = self.inner.with_slot(|s| s.transitions);
        let wait = poll_fn(|cx| {
            self.inner.with_slot(|s| {
                let fresh = trigger == Trigger::Level || s.transitions != since;
                if fresh && states.contains(&s.state) {
                    return Poll::Ready(s.state);
                }
                s.owners.register(cx.waker());
                Poll::Pending
            })
        });
        timeout.deadline().run(wait).await
    }

    /// Queue a command, waiting while the mailbox is full. It is handled
    /// after the current step; on a `Terminated` node, after the next run.
    pub async fn post(&self, cmd: B::Command) {
        self.inner.mailbox.send(cmd).await;
        self.inner.wake.set(MAIL);
    }

    /// Queue a command if the mailbox has room, otherwise hand it back.
    pub fn try_post(&self, cmd: B::Command) -> Result<(), B::Command> {
        match self.inner.mailbox.try_send(cmd) {
            Ok(()) => {
                self.inner.wake.set(MAIL);
                Ok(())
            }
            Err(TrySendError::Full(cmd)) => Err(cmd),
        }
    }

    /// Queue a command and cancel the step in progress so it is handled
    /// next.
    pub async fn post_urgent(&self, cmd: B::Command) {
        self.inner.mailbox.send(cmd).await;
        self.inner.wake.set(INTERRUPT);
    }
}

/// Object-safe lifecycle control, implemented by every node.
pub trait NodeControl: Send + Sync {
    /// Node id.
    fn id(&self) -> NodeId;
    /// Node name.
    fn name(&self) -> &'static str;
    /// Current state.
    fn state(&self) -> NodeState;
    /// See [`Node::request_run`].
    ///
    /// # Errors
    ///
    /// [`SpawnError`] when a worker could not be started.
    fn request_run(&self) -> Result<(), SpawnError>;
    /// See [`Node::request_pause`].
    fn request_pause(&self);
    /// See [`Node::request_stop`].
    fn request_stop(&self);
    /// See [`Node::request_terminate`].
    fn request_terminate(&self);
    /// See [`Node::join`].
    fn join(&self, timeout: Timeout) -> Pin<alloc::boxed::Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}

impl<B: NodeBehavior> NodeControl for Arc<NodeInner<B>> {
    fn id(&self) -> NodeId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        self.ctx.name
    }

    fn state(&self) -> NodeState {
        NodeInner::state(self)
    }

    fn request_run(&self) -> Result<(), SpawnError> {
        NodeInner::request_run(self).map(|_| ())
    }

    fn request_pause(&self) {
        self.request_live(Request::Pause);
    }

    fn request_stop(&self) {
        self.request_live(Request::Stop);
    }

    fn request_terminate(&self) {
        self.request_live(Request::Terminate);
    }

    fn join(&self, timeout: Timeout) -> Pin<alloc::boxed::Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        boxed(NodeInner::join(self, timeout))
    }
}
