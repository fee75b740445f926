//! JSON-lines transport for running a worker as a child process.
//!
//! Each line on the input is one [`Command`], each line on the output is one
//! [`Reply`](crate::Reply). A line that is not a valid command is queued as a
//! rejection and answered with an `error` reply in arrival order. End of input
//! is a termination request: the worker finishes the command in progress,
//! releases its cache and exits.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::protocol::Command;
use crate::worker::{Inbound, Worker};

const COMMAND_BUFFER: usize = 32;

/// Serve `worker` over a line-framed reader and writer.
pub async fn serve_stdio<R, W>(worker: Worker, reader: R, writer: W) -> Result<(), WorkerError>
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let (command_tx, command_rx) = mpsc::channel::<Inbound>(COMMAND_BUFFER);
  let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

  let read = async move {
    let mut lines = FramedRead::new(reader, LinesCodec::new());
    loop {
      let line = tokio::select! {
        _ = command_tx.closed() => break,
        line = lines.next() => line,
      };

      let inbound = match line {
        None => {
          info!("end of input, requesting termination");
          break;
        }
        Some(Err(e)) => {
          warn!(error = %e, "failed to read command");
          let _ = command_tx.send(Err(codec_error(e))).await;
          break;
        }
        Some(Ok(line)) if line.trim().is_empty() => continue,
        Some(Ok(line)) => serde_json::from_str::<Command>(&line).map_err(WorkerError::from),
      };

      if command_tx.send(inbound).await.is_err() {
        break;
      }
    }
  };

  let write = async move {
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    while let Some(reply) = reply_rx.recv().await {
      let line = serde_json::to_string(&reply)?;
      sink.send(line).await.map_err(codec_error)?;
    }
    Ok::<(), WorkerError>(())
  };

  let ((), served, written) = tokio::join!(read, worker.serve(command_rx, reply_tx), write);
  written?;
  served
}

pub(crate) fn codec_error(error: LinesCodecError) -> WorkerError {
  match error {
    LinesCodecError::Io(e) => WorkerError::Io(e),
    LinesCodecError::MaxLineLengthExceeded => WorkerError::Io(std::io::Error::new(
      std::io::ErrorKind::InvalidData,
      "line length limit exceeded",
    )),
  }
}
