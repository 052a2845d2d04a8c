use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{parse_line, Response};

const RESPONSE_QUEUE: usize = 256;

/// Newline-delimited JSON-RPC over any byte stream pair. Each request runs in
/// its own task; a single writer task serializes responses in completion
/// order. Returns after the input reaches EOF and every in-flight request has
/// been answered.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Response>(RESPONSE_QUEUE);
    let writer_task = tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);
        while let Some(response) = rx.recv().await {
            let mut line = response.to_line();
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .await
                .context("failed writing response")?;
            writer.flush().await.context("failed flushing response")?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut tasks = JoinSet::new();
    loop {
        buffer.clear();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .await
            .context("failed reading request stream")?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(request) => {
                debug!(
                    "{} {} id={}",
                    if request.is_notification() { "notification" } else { "request" },
                    request.method,
                    request.id.as_ref().map(ToString::to_string).unwrap_or_default()
                );
                let dispatcher = dispatcher.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    if let Some(response) = dispatcher.handle(request).await {
                        if tx.send(response).await.is_err() {
                            warn!("response dropped, writer has stopped");
                        }
                    }
                });
            }
            Err(response) => {
                if tx.send(response).await.is_err() {
                    break;
                }
            }
        }

        while let Some(joined) = tasks.try_join_next() {
            log_join(joined);
        }
    }

    if !tasks.is_empty() {
        info!("input closed, waiting for {} in-flight requests", tasks.len());
    }
    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
    drop(tx);
    writer_task.await.context("response writer task failed")??;
    Ok(())
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        warn!("request task ended abnormally: {err}");
    }
}
