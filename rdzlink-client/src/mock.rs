use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rdzlink_rs_protocol::ServiceAddress;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

enum StationAction {
    Write(Vec<u8>),
    Close,
}

/// Scripted TTGO station: records every line the client sends and writes
/// or hangs up on demand. Serves one connection at a time.
pub struct MockStation {
    addr: SocketAddr,
    actions: mpsc::UnboundedSender<StationAction>,
    received: mpsc::UnboundedReceiver<String>,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockStation {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        tokio::spawn(Self::serve(
            listener,
            actions_rx,
            received_tx,
            accepted.clone(),
            closed.clone(),
        ));

        Self {
            addr,
            actions: actions_tx,
            received: received_rx,
            accepted,
            closed,
        }
    }

    pub fn address(&self) -> ServiceAddress {
        ServiceAddress::new("127.0.0.1", self.addr.port())
    }

    /// Write text to the current (or next) client.
    pub fn write(&self, data: &str) {
        self.write_bytes(data.as_bytes());
    }

    pub fn write_bytes(&self, data: &[u8]) {
        self.actions
            .send(StationAction::Write(data.to_vec()))
            .unwrap();
    }

    /// Hang up on the current client.
    pub fn close(&self) {
        self.actions.send(StationAction::Close).unwrap();
    }

    /// Next line received from the client, without its line terminator.
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for a line from the client")
            .expect("mock station stopped")
    }

    /// Assert that the client sends nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(line)) = tokio::time::timeout(window, self.received.recv()).await {
            panic!("expected no traffic, got {line:?}");
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait until `count` client connections have ended.
    pub async fn wait_closed(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.closed.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for the client to close");
    }

    async fn serve(
        listener: TcpListener,
        mut actions: mpsc::UnboundedReceiver<StationAction>,
        received: mpsc::UnboundedSender<String>,
        accepted: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    ) {
        while let Ok((stream, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);

            let (read_half, mut write_half) = stream.into_split();
            let lines = received.clone();
            let mut reader = tokio::spawn(async move {
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if lines.send(line.trim_end().to_owned()).is_err() {
                                break;
                            }
                        }
                    }
                }
            });

            loop {
                tokio::select! {
                    action = actions.recv() => match action {
                        Some(StationAction::Write(data)) => {
                            if write_half.write_all(&data).await.is_err() {
                                break;
                            }
                            let _ = write_half.flush().await;
                        }
                        Some(StationAction::Close) => {
                            let _ = write_half.shutdown().await;
                            break;
                        }
                        None => {
                            reader.abort();
                            return;
                        }
                    },
                    _ = &mut reader => break,
                }
            }

            reader.abort();
            closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
