//! The Streaming Coordinator: the state machine that starts/stops the
//! encoder on viewer arrival/departure, glues the GOP buffer and client
//! manager to the forwarder, and applies the crash-restart policy.
//!
//! The coordinator is a single actor task owning its state, the encoder
//! supervisor, the GOP buffer, and the health monitor. Everything else
//! (the WebSocket handler, the forwarder task) talks to it only through
//! `CoordinatorHandle`, never by holding a reference to the coordinator
//! itself — the message-passing boundary spec.md §9 asks for in place of
//! the original's cyclic references.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use uuid::Uuid;

use crate::client_manager::ClientManager;
use crate::forwarder::{self, ForwarderEof};
use crate::gop_buffer::GopBuffer;
use crate::health::HealthMonitor;
use crate::supervisor::{CommandBuilder, ProcessSupervisor};
use crate::telemetry::Telemetry;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_POLICY: u16 = 1008;
const CLOSE_INTERNAL: u16 = 1011;

/// Reaping a just-exited child after an unexpected stdout EOF is bounded
/// by this, not the configured shutdown grace (that grace is for
/// deliberate, operator-initiated stops).
const CRASH_REAP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Starting,
    Running,
    Draining,
    Stopping,
    Faulted,
}

pub enum ConnectOutcome {
    Admitted {
        viewer_id: Uuid,
        receiver: mpsc::Receiver<crate::client_manager::ViewerFrame>,
    },
    Rejected {
        close_code: u16,
    },
}

enum Msg {
    ViewerConnect(oneshot::Sender<ConnectOutcome>),
    ViewerDisconnect(Uuid),
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    Msg(Msg),
    ForwarderEof,
    DrainTimerFired(u64),
}

/// Cheap to clone; every caller (WebSocket handler, signal handler) holds
/// one of these rather than the coordinator itself.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Msg>,
    faulted: watch::Receiver<bool>,
}

impl CoordinatorHandle {
    /// Resolves once the coordinator enters `Faulted` (the restart breaker
    /// has tripped). `main` uses this to self-exit with the dedicated
    /// breaker-tripped exit code rather than continuing to serve a
    /// coordinator that will reject every future viewer with a policy close.
    pub async fn faulted(&self) {
        let mut rx = self.faulted.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|faulted| *faulted).await;
    }

    pub async fn connect_viewer(&self) -> ConnectOutcome {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send(Msg::ViewerConnect(respond_to)).await.is_err() {
            return ConnectOutcome::Rejected {
                close_code: CLOSE_INTERNAL,
            };
        }
        rx.await.unwrap_or(ConnectOutcome::Rejected {
            close_code: CLOSE_INTERNAL,
        })
    }

    pub async fn disconnect_viewer(&self, viewer_id: Uuid) {
        let _ = self.tx.send(Msg::ViewerDisconnect(viewer_id)).await;
    }

    /// Orderly teardown: evict all viewers with close code 1000, stop the
    /// encoder, and settle back to `Idle`. Resolves once the coordinator
    /// has finished, or immediately if the coordinator has already shut
    /// down.
    pub async fn shutdown(&self) {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown(respond_to)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct Coordinator {
    state: State,
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    gop: Arc<Mutex<GopBuffer>>,
    clients: Arc<ClientManager>,
    health: HealthMonitor,
    command_builder: Arc<dyn CommandBuilder>,
    telemetry: Arc<Telemetry>,
    shutdown_grace: Duration,
    drain_grace: Duration,
    drain_generation: u64,
    drain_tx: mpsc::Sender<u64>,
    drain_rx: mpsc::Receiver<u64>,
    eof_tx: mpsc::Sender<ForwarderEof>,
    eof_rx: mpsc::Receiver<ForwarderEof>,
    faulted_tx: watch::Sender<bool>,
}

impl Coordinator {
    /// Spawn the coordinator actor and return a handle to it. `drain_grace`
    /// is `shutdown_grace_seconds` from config (the delay before the
    /// encoder is torn down after the last viewer leaves); `shutdown_grace`
    /// is the grace period passed to the supervisor's own two-phase stop.
    pub fn spawn(
        command_builder: Arc<dyn CommandBuilder>,
        telemetry: Arc<Telemetry>,
        queue_capacity: usize,
        crash_threshold: u32,
        crash_window: Duration,
        drain_grace: Duration,
        shutdown_grace: Duration,
    ) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(64);
        let (eof_tx, eof_rx) = mpsc::channel(1);
        let (drain_tx, drain_rx) = mpsc::channel(1);
        let (faulted_tx, faulted_rx) = watch::channel(false);

        let coordinator = Coordinator {
            state: State::Idle,
            supervisor: Arc::new(Mutex::new(ProcessSupervisor::new())),
            gop: Arc::new(Mutex::new(GopBuffer::new())),
            clients: Arc::new(ClientManager::new(queue_capacity, telemetry.clone())),
            health: HealthMonitor::new(crash_threshold, crash_window),
            command_builder,
            telemetry,
            shutdown_grace,
            drain_grace,
            drain_generation: 0,
            drain_tx,
            drain_rx,
            eof_tx,
            eof_rx,
            faulted_tx,
        };

        tokio::spawn(coordinator.run(rx));

        CoordinatorHandle {
            tx,
            faulted: faulted_rx,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Msg>) {
        loop {
            let event = tokio::select! {
                msg = mailbox.recv() => match msg {
                    Some(msg) => Event::Msg(msg),
                    None => return,
                },
                eof = self.eof_rx.recv() => match eof {
                    Some(_) => Event::ForwarderEof,
                    None => continue,
                },
                fired = self.drain_rx.recv() => match fired {
                    Some(generation) => Event::DrainTimerFired(generation),
                    None => continue,
                },
            };

            match event {
                Event::Msg(Msg::ViewerConnect(respond_to)) => {
                    let outcome = self.handle_viewer_connect().await;
                    let _ = respond_to.send(outcome);
                }
                Event::Msg(Msg::ViewerDisconnect(id)) => {
                    self.handle_viewer_disconnect(id).await;
                }
                Event::Msg(Msg::Shutdown(respond_to)) => {
                    self.handle_shutdown().await;
                    let _ = respond_to.send(());
                    return;
                }
                Event::ForwarderEof => self.handle_supervisor_exit().await,
                Event::DrainTimerFired(generation) => self.handle_drain_timer(generation).await,
            }
        }
    }

    async fn handle_viewer_connect(&mut self) -> ConnectOutcome {
        match self.state {
            State::Faulted => ConnectOutcome::Rejected {
                close_code: CLOSE_POLICY,
            },
            State::Idle => {
                let (id, receiver) = self.clients.add().await;
                match self.start_encoder().await {
                    Ok(()) => {
                        self.state = State::Running;
                        self.spawn_forwarder();
                        ConnectOutcome::Admitted {
                            viewer_id: id,
                            receiver,
                        }
                    }
                    Err(()) => {
                        self.clients.remove(id).await;
                        let now = Instant::now();
                        self.health.record_crash(now);
                        if self.health.should_restart(now) {
                            self.state = State::Idle;
                        } else {
                            self.enter_faulted();
                        }
                        ConnectOutcome::Rejected {
                            close_code: CLOSE_INTERNAL,
                        }
                    }
                }
            }
            State::Starting => {
                // Unreachable in practice: `start_encoder` resolves
                // synchronously within one mailbox turn, so no other
                // message is ever processed while `Starting`. Kept as a
                // state for the health/telemetry bookkeeping around it
                // and to mirror the state machine as specified.
                let (id, receiver) = self.clients.add().await;
                ConnectOutcome::Admitted {
                    viewer_id: id,
                    receiver,
                }
            }
            State::Running => {
                let (id, receiver) = self.clients.add().await;
                self.send_bootstrap(id).await;
                ConnectOutcome::Admitted {
                    viewer_id: id,
                    receiver,
                }
            }
            State::Draining => {
                self.drain_generation += 1; // invalidate the pending timer
                let (id, receiver) = self.clients.add().await;
                self.send_bootstrap(id).await;
                self.state = State::Running;
                ConnectOutcome::Admitted {
                    viewer_id: id,
                    receiver,
                }
            }
            State::Stopping => ConnectOutcome::Rejected {
                close_code: CLOSE_INTERNAL,
            },
        }
    }

    async fn handle_viewer_disconnect(&mut self, id: Uuid) {
        self.clients.remove(id).await;

        if self.state == State::Running && self.clients.is_empty().await {
            self.state = State::Draining;
            self.arm_drain_timer();
        }
    }

    async fn handle_drain_timer(&mut self, generation: u64) {
        if generation != self.drain_generation {
            return; // superseded by a later viewer_connect or another timer
        }
        if self.state != State::Draining || !self.clients.is_empty().await {
            return;
        }

        self.state = State::Stopping;
        self.supervisor.lock().await.stop(self.shutdown_grace).await;
        self.gop.lock().await.reset();
        self.health.reset();
        self.state = State::Idle;
    }

    async fn handle_supervisor_exit(&mut self) {
        match self.state {
            State::Running | State::Draining => {}
            _ => return, // Stopping (self-induced) or already resolved
        }

        let now = Instant::now();
        self.health.record_crash(now);
        self.gop.lock().await.reset();
        self.log_crash_diagnostics().await;
        self.supervisor.lock().await.stop(CRASH_REAP_GRACE).await;
        self.telemetry.inc_encoder_restart();

        if self.health.should_restart(now) {
            self.state = State::Starting;
            match self.start_encoder().await {
                Ok(()) => {
                    self.state = State::Running;
                    self.spawn_forwarder();
                }
                Err(()) => {
                    let now = Instant::now();
                    self.health.record_crash(now);
                    if self.health.should_restart(now) {
                        self.state = State::Idle;
                        self.clients.close_all(CLOSE_INTERNAL).await;
                    } else {
                        self.enter_faulted();
                        self.clients.close_all(CLOSE_POLICY).await;
                    }
                }
            }
        } else {
            self.enter_faulted();
            self.clients.close_all(CLOSE_POLICY).await;
        }
    }

    async fn handle_shutdown(&mut self) {
        self.state = State::Stopping;
        self.drain_generation += 1;
        self.clients.close_all(CLOSE_NORMAL).await;
        self.supervisor.lock().await.stop(self.shutdown_grace).await;
        self.gop.lock().await.reset();
        self.health.reset();
        self.state = State::Idle;
    }

    async fn start_encoder(&mut self) -> Result<(), ()> {
        let mut supervisor = self.supervisor.lock().await;
        match supervisor.start(&*self.command_builder) {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::error!(%error, "encoder failed to start");
                self.telemetry.inc_encoder_start_failure();
                Err(())
            }
        }
    }

    /// Logs what's known about the just-exited encoder before `stop()`
    /// reaps it: the exit code via `poll()` (distinguishing a clean exit
    /// from a crash) and uptime via `handle()`, when available. stdout EOF
    /// alone doesn't tell us which happened; this is best-effort diagnostic
    /// context for an exit the coordinator has already decided is unexpected.
    async fn log_crash_diagnostics(&self) {
        let mut supervisor = self.supervisor.lock().await;
        let exit_code = supervisor.poll();
        let uptime = supervisor.handle().map(|handle| handle.started_at.elapsed());

        match (exit_code, uptime) {
            (Some(code), Some(uptime)) => {
                tracing::warn!(exit_code = code, uptime_secs = uptime.as_secs(), "encoder exited unexpectedly");
            }
            (Some(code), None) => {
                tracing::warn!(exit_code = code, "encoder exited unexpectedly");
            }
            (None, _) => {
                tracing::warn!("encoder stdout closed but exit status not yet reaped");
            }
        }
    }

    fn spawn_forwarder(&self) {
        tokio::spawn(forwarder::run(
            self.supervisor.clone(),
            self.gop.clone(),
            self.clients.clone(),
            self.telemetry.clone(),
            self.eof_tx.clone(),
        ));
    }

    fn arm_drain_timer(&mut self) {
        self.drain_generation += 1;
        let generation = self.drain_generation;
        let tx = self.drain_tx.clone();
        let grace = self.drain_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(generation).await;
        });
    }

    /// Transition to `Faulted` and publish it to anyone awaiting
    /// `CoordinatorHandle::faulted()` (namely `main`'s self-exit path).
    fn enter_faulted(&mut self) {
        self.state = State::Faulted;
        let _ = self.faulted_tx.send(true);
    }

    async fn send_bootstrap(&self, viewer_id: Uuid) {
        let bootstrap = self.gop.lock().await.bootstrap();
        if !bootstrap.is_empty() {
            let _ = self.clients.send_to(viewer_id, bootstrap).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::ViewerFrame;

    struct SleepCommand(&'static str);

    impl CommandBuilder for SleepCommand {
        fn build(&self) -> Vec<String> {
            vec!["/bin/sh".into(), "-c".into(), self.0.into()]
        }
    }

    struct FailingCommand;

    impl CommandBuilder for FailingCommand {
        fn build(&self) -> Vec<String> {
            vec!["/definitely/not/a/real/binary".into()]
        }
    }

    fn spawn_with(builder: Arc<dyn CommandBuilder>, drain_grace: Duration) -> CoordinatorHandle {
        Coordinator::spawn(
            builder,
            Arc::new(Telemetry::default()),
            16,
            3,
            Duration::from_secs(60),
            drain_grace,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn lazy_start_admits_first_viewer_and_starts_encoder() {
        let handle = spawn_with(Arc::new(SleepCommand("sleep 1")), Duration::from_millis(50));

        match handle.connect_viewer().await {
            ConnectOutcome::Admitted { viewer_id, .. } => {
                handle.disconnect_viewer(viewer_id).await;
            }
            ConnectOutcome::Rejected { close_code } => panic!("expected admission, got {close_code}"),
        }
    }

    #[tokio::test]
    async fn encoder_start_failure_rejects_viewer() {
        let handle = spawn_with(Arc::new(FailingCommand), Duration::from_millis(50));

        match handle.connect_viewer().await {
            ConnectOutcome::Rejected { close_code } => assert_eq!(close_code, CLOSE_INTERNAL),
            ConnectOutcome::Admitted { .. } => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn draining_viewer_reconnect_cancels_shutdown() {
        let handle = spawn_with(Arc::new(SleepCommand("sleep 5")), Duration::from_millis(100));

        let first = match handle.connect_viewer().await {
            ConnectOutcome::Admitted { viewer_id, .. } => viewer_id,
            ConnectOutcome::Rejected { close_code } => panic!("expected admission, got {close_code}"),
        };
        handle.disconnect_viewer(first).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        match handle.connect_viewer().await {
            ConnectOutcome::Admitted { viewer_id, .. } => {
                handle.disconnect_viewer(viewer_id).await;
            }
            ConnectOutcome::Rejected { close_code } => panic!("expected admission, got {close_code}"),
        }
    }

    #[tokio::test]
    async fn faulted_viewers_are_rejected_with_policy_code() {
        // A crash threshold of 1 means the very first start failure trips
        // the breaker immediately.
        let handle = Coordinator::spawn(
            Arc::new(FailingCommand),
            Arc::new(Telemetry::default()),
            16,
            1,
            Duration::from_secs(60),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        let _ = handle.connect_viewer().await;

        match handle.connect_viewer().await {
            ConnectOutcome::Rejected { close_code } => assert_eq!(close_code, CLOSE_POLICY),
            ConnectOutcome::Admitted { .. } => panic!("expected policy rejection once faulted"),
        }

        tokio::time::timeout(Duration::from_secs(1), handle.faulted())
            .await
            .expect("faulted() should resolve once the breaker trips");
    }

    #[tokio::test]
    async fn repeated_unexpected_encoder_exit_eventually_trips_breaker() {
        // The encoder exits immediately every time it's (re)started, which
        // drives the coordinator through handle_supervisor_exit's crash
        // diagnostics/restart path repeatedly until the breaker trips.
        let handle = Coordinator::spawn(
            Arc::new(SleepCommand("true")),
            Arc::new(Telemetry::default()),
            16,
            3,
            Duration::from_secs(60),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );

        let _ = handle.connect_viewer().await;

        tokio::time::timeout(Duration::from_secs(2), handle.faulted())
            .await
            .expect("breaker should trip after repeated unexpected exits");
    }

    #[tokio::test]
    async fn shutdown_closes_viewers_with_normal_code() {
        let handle = spawn_with(Arc::new(SleepCommand("sleep 5")), Duration::from_millis(200));

        let mut receiver = match handle.connect_viewer().await {
            ConnectOutcome::Admitted { receiver, .. } => receiver,
            ConnectOutcome::Rejected { close_code } => panic!("expected admission, got {close_code}"),
        };

        handle.shutdown().await;

        match receiver.recv().await.unwrap() {
            ViewerFrame::Close(code) => assert_eq!(code, CLOSE_NORMAL),
            ViewerFrame::Data(_) => panic!("expected close frame"),
        }
    }
}
