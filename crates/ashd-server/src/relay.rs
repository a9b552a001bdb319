//! Bidirectional byte relay between the peer channel and the process.
//!
//! Two concurrent copies per session:
//! - reverse (peer -> process stdin): best effort, failures logged;
//! - forward (process -> peer): the session-ending copy, with every chunk
//!   duplicated into the transcript sink.
//!
//! The transcript write goes through a bounded conduit so a slow sink can
//! never stall delivery to the peer. Overflow drops the chunk with a
//! warning - transcript loss is in the non-fatal class.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ashd_core::constants::{RELAY_BUF_SIZE, TRANSCRIPT_CONDUIT_DEPTH};
use ashd_core::error::Result;
use ashd_core::sink::ByteSink;

/// Spawn the reverse copy: peer input into the process's stdin.
///
/// Ends when either side closes. Dropping the writer on task end closes
/// the process's stdin, delivering EOF.
pub fn spawn_inbound_copy<R, W>(mut peer: R, mut stdin: W) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut peer, &mut stdin).await {
            debug!(error = %e, "Inbound copy ended with error");
        }
    })
}

/// Forward copy: process output to the peer, teed into the transcript.
///
/// Returns the number of bytes delivered to the peer. Completion (process
/// closed its output, or the peer went away) signals end-of-session to the
/// caller. The transcript sink is flushed and shut down before returning.
pub async fn forward_copy<R, W>(mut output: R, mut peer: W, transcript: ByteSink) -> Result<u64>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(TRANSCRIPT_CONDUIT_DEPTH);

    let writer = tokio::spawn(async move {
        let mut transcript = transcript;
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = transcript.write_all(&chunk).await {
                warn!(error = %e, "Failed to write transcript chunk");
            }
        }
        if let Err(e) = transcript.shutdown().await {
            debug!(error = %e, "Failed to close transcript sink");
        }
    });

    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;
    let result = loop {
        match output.read(&mut buf).await {
            Ok(0) => break Ok(total),
            Ok(n) => {
                if tx.try_send(buf[..n].to_vec()).is_err() {
                    warn!(len = n, "Transcript conduit full, dropping chunk");
                }
                if let Err(e) = peer.write_all(&buf[..n]).await {
                    break Err(e.into());
                }
                total += n as u64;
            }
            Err(e) => break Err(e.into()),
        }
    };

    let _ = peer.flush().await;

    // Close the conduit and let the writer drain before the sink is lost.
    drop(tx);
    let _ = writer.await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn forward_copy_tees_into_transcript() {
        let (mut process_out_w, process_out_r) = duplex(1024);
        let (peer_w, mut peer_r) = duplex(1024);
        let (transcript_w, mut transcript_r) = duplex(1024);

        let relay = tokio::spawn(forward_copy(
            process_out_r,
            peer_w,
            Box::new(transcript_w) as ByteSink,
        ));

        process_out_w.write_all(b"hello ").await.unwrap();
        process_out_w.write_all(b"world").await.unwrap();
        drop(process_out_w);

        let total = relay.await.unwrap().unwrap();
        assert_eq!(total, 11);

        let mut to_peer = Vec::new();
        peer_r.read_to_end(&mut to_peer).await.unwrap();
        assert_eq!(to_peer, b"hello world");

        let mut to_transcript = Vec::new();
        transcript_r.read_to_end(&mut to_transcript).await.unwrap();
        assert_eq!(to_transcript, b"hello world");
    }

    #[tokio::test]
    async fn forward_copy_ends_on_process_eof() {
        let (process_out_w, process_out_r) = duplex(64);
        let (peer_w, _peer_r) = duplex(64);
        let (transcript_w, _transcript_r) = duplex(64);

        drop(process_out_w); // immediate EOF
        let total = forward_copy(process_out_r, peer_w, Box::new(transcript_w) as ByteSink)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn inbound_copy_delivers_and_closes_stdin() {
        let (mut peer_w, peer_r) = duplex(64);
        let (stdin_w, mut stdin_r) = duplex(64);

        let task = spawn_inbound_copy(peer_r, stdin_w);
        peer_w.write_all(b"input bytes").await.unwrap();
        drop(peer_w);
        task.await.unwrap();

        let mut received = Vec::new();
        stdin_r.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"input bytes");
    }
}
