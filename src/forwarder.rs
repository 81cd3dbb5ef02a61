//! Pumps the encoder's stdout into the GOP buffer and the viewer broadcast,
//! on a dedicated task so a blocking pipe read never stalls the coordinator.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::client_manager::ClientManager;
use crate::gop_buffer::GopBuffer;
use crate::supervisor::ProcessSupervisor;
use crate::telemetry::Telemetry;

/// Bytes read per `read_stdout` call.
const READ_CHUNK_SIZE: usize = 8192;

/// Sent once, when the supervisor's stdout reaches EOF (the encoder has
/// exited, cleanly or not). The coordinator is the sole consumer.
pub struct ForwarderEof;

/// Runs until EOF or a read error, then notifies the coordinator via
/// `eof_tx` and returns. Intended to be spawned as its own task per
/// encoder run; a new `Forwarder` is spawned for each `Starting` →
/// `Running` transition.
pub async fn run(
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    gop: Arc<Mutex<GopBuffer>>,
    clients: Arc<ClientManager>,
    telemetry: Arc<Telemetry>,
    eof_tx: mpsc::Sender<ForwarderEof>,
) {
    loop {
        let chunk = {
            let mut supervisor = supervisor.lock().await;
            let chunk = match supervisor.read_stdout(READ_CHUNK_SIZE).await {
                Ok(chunk) => chunk,
                Err(error) => {
                    tracing::warn!(%error, "encoder stdout read error, treating as EOF");
                    Vec::new()
                }
            };

            // Drain buffered stderr diagnostics once per loop iteration so
            // the encoder's stderr pipe never backs up behind an unread
            // channel (stderr is diagnostic-only, never forwarded).
            while let Some(line) = supervisor.read_stderr_line() {
                tracing::debug!(encoder_stderr = %line);
            }

            chunk
        };

        if chunk.is_empty() {
            tracing::info!("encoder stdout reached EOF");
            let _ = eof_tx.send(ForwarderEof).await;
            return;
        }

        telemetry.add_bytes_forwarded(chunk.len() as u64);
        telemetry.inc_chunks_forwarded();

        {
            let mut gop = gop.lock().await;
            if gop.ingest(&chunk) {
                telemetry.inc_flv_resync();
                tracing::debug!("GOP buffer lost sync, bootstrap state held until resync");
            }
        }

        clients.broadcast(Bytes::from(chunk)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::CommandBuilder;

    struct EchoCommand;

    impl CommandBuilder for EchoCommand {
        fn build(&self) -> Vec<String> {
            vec!["/bin/echo".to_string(), "-n".to_string(), "FLVdata".to_string()]
        }
    }

    struct StderrCommand;

    impl CommandBuilder for StderrCommand {
        fn build(&self) -> Vec<String> {
            vec!["/bin/sh".to_string(), "-c".to_string(), "echo warning >&2".to_string()]
        }
    }

    #[tokio::test]
    async fn drains_stderr_without_blocking_stdout_forwarding() {
        let mut supervisor = ProcessSupervisor::new();
        supervisor.start(&StderrCommand).unwrap();
        let supervisor = Arc::new(Mutex::new(supervisor));

        let gop = Arc::new(Mutex::new(GopBuffer::new()));
        let telemetry = Arc::new(Telemetry::default());
        let clients = Arc::new(ClientManager::new(16, telemetry.clone()));

        let (eof_tx, mut eof_rx) = mpsc::channel(1);
        run(supervisor, gop, clients, telemetry, eof_tx).await;

        assert!(eof_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn forwards_bytes_and_signals_eof() {
        let mut supervisor = ProcessSupervisor::new();
        supervisor.start(&EchoCommand).unwrap();
        let supervisor = Arc::new(Mutex::new(supervisor));

        let gop = Arc::new(Mutex::new(GopBuffer::new()));
        let telemetry = Arc::new(Telemetry::default());
        let clients = Arc::new(ClientManager::new(16, telemetry.clone()));
        let (_viewer_id, mut rx) = clients.add().await;

        let (eof_tx, mut eof_rx) = mpsc::channel(1);
        run(supervisor, gop, clients, telemetry.clone(), eof_tx).await;

        assert!(eof_rx.recv().await.is_some());
        let received = rx.recv().await.unwrap();
        match received {
            crate::client_manager::ViewerFrame::Data(bytes) => assert_eq!(&bytes[..], b"FLVdata"),
            crate::client_manager::ViewerFrame::Close(code) => panic!("expected data frame, got close({code})"),
        }
        assert_eq!(telemetry.snapshot().chunks_forwarded, 1);
    }
}
