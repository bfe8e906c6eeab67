use crate::realtime::Outbound;
use crate::video::transcode::{TranscodeError, TranscodeOutput};
use log::debug;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every block was relayed and the process exited cleanly
    Finished { chunks: u64, bytes: u64 },
    /// The connection went away; the process was killed
    ConnectionClosed,
}

/// Relays transcoder output to one connection as binary frames
pub struct ChunkStreamer {
    outbound: mpsc::Sender<Outbound>,
}

impl ChunkStreamer {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self { outbound }
    }

    /// Send each block in order, waiting for queue capacity between blocks.
    /// Consumes the output so the process and artifact are always released.
    pub async fn relay(&self, mut output: TranscodeOutput) -> Result<StreamEnd, TranscodeError> {
        let mut chunks = 0u64;
        let mut bytes = 0u64;

        while let Some(chunk) = output.next_chunk().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    output.abort().await;
                    return Err(e);
                }
            };

            let len = chunk.len() as u64;
            if self.outbound.send(Outbound::Binary(chunk)).await.is_err() {
                debug!("Connection closed after {} chunks, stopping transcoder", chunks);
                output.abort().await;
                return Ok(StreamEnd::ConnectionClosed);
            }

            chunks += 1;
            bytes += len;
        }

        output.finish().await?;

        Ok(StreamEnd::Finished { chunks, bytes })
    }
}
