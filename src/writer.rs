//! Dedicated writer task for outbound packets.
//!
//! Senders never touch the socket. Each send encodes its frame into a pooled
//! [`ByteCursorBuffer`] and queues it on an mpsc channel; the writer task
//! drains the channel in batches and writes them with scatter/gather I/O.
//!
//! ```text
//! send() ───┐
//! send() ───┼─► mpsc::Sender<OutboundPacket> ─► Writer Task ─► TcpStream
//! try_send()┘
//! ```
//!
//! A packet's buffer goes back to its pool as soon as the packet has been
//! written, or when the packet is dropped unsent during teardown.

use std::fmt;
use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::buffer::ByteCursorBuffer;
use crate::config::WriterConfig;
use crate::error::{FramelinkError, Result};
use crate::pool::Pooled;
use crate::stats::Counters;

/// Maximum packets to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// One encoded frame waiting for the socket.
pub struct OutboundPacket {
    buffer: Pooled<ByteCursorBuffer>,
}

impl OutboundPacket {
    /// Wrap a pooled buffer holding exactly one encoded frame.
    #[inline]
    pub fn new(buffer: Pooled<ByteCursorBuffer>) -> Self {
        Self { buffer }
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

impl fmt::Debug for OutboundPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundPacket")
            .field("size", &self.size())
            .finish()
    }
}

/// Handle for queueing packets on the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundPacket>,
    /// Queued but not yet written (for backpressure).
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

/// Receiving end of the packet queue, consumed by [`run_writer`].
pub struct PacketQueue {
    rx: mpsc::Receiver<OutboundPacket>,
    pending: Arc<AtomicUsize>,
}

/// Create a packet queue and the handle that feeds it.
pub fn packet_channel(config: &WriterConfig) -> (WriterHandle, PacketQueue) {
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout(),
    };

    (handle, PacketQueue { rx, pending })
}

impl WriterHandle {
    /// Queue a packet, waiting while backpressure is active.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if the queue does not drain in time,
    /// `ConnectionClosed` if the writer task is gone.
    pub async fn send(&self, packet: OutboundPacket) -> Result<()> {
        if self.is_backpressure_active() {
            self.wait_for_backpressure().await?;
        }

        // Count before sending so the writer can never decrement first
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(packet).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            FramelinkError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.tx.is_closed() {
                return Err(FramelinkError::ConnectionClosed);
            }

            if !self.is_backpressure_active() {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(FramelinkError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Queue a packet without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, packet: OutboundPacket) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(FramelinkError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(packet).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => FramelinkError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => FramelinkError::ConnectionClosed,
            }
        })
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped receiving.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn a writer task over `writer`.
///
/// The returned `JoinHandle` resolves with the task's exit status: `Ok` once
/// every handle is dropped, `Err` on the first write failure.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    config: &WriterConfig,
    counters: Arc<Counters>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (handle, queue) = packet_channel(config);
    let task = tokio::spawn(run_writer(queue, writer, counters));
    (handle, task)
}

/// Drain `queue` into `writer` until the queue closes or a write fails.
pub(crate) async fn run_writer<W>(
    mut queue: PacketQueue,
    mut writer: W,
    counters: Arc<Counters>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match queue.rx.recv().await {
            Some(packet) => packet,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match queue.rx.try_recv() {
                Ok(packet) => batch.push(packet),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let bytes = write_batch(&mut writer, &batch).await?;
        trace!(packets = batch_size, bytes, "Wrote batch");

        counters.record_sent(batch_size, bytes);
        queue.pending.fetch_sub(batch_size, Ordering::Release);
        // Buffers return to their pool here
        drop(batch);
    }
}

/// Write a batch with `write_vectored`, resuming after partial writes.
///
/// Returns the number of bytes written.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundPacket]) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundPacket::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(FramelinkError::SocketFault(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(total_written)
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
///
/// A packet contributes up to two slices when its buffer has wrapped.
fn build_remaining_slices(batch: &[OutboundPacket], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for packet in batch {
        let (head, tail) = packet.buffer.readable_slices();
        for part in [head, tail] {
            if part.is_empty() {
                continue;
            }
            let end = offset + part.len();
            if skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ObjectPool;
    use crate::protocol::FrameCodec;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn buffer_pool() -> ObjectPool<ByteCursorBuffer> {
        ObjectPool::with_capacity(4, || ByteCursorBuffer::with_capacity(32))
    }

    fn packet(
        pool: &ObjectPool<ByteCursorBuffer>,
        type_name: &str,
        payload: &[u8],
    ) -> OutboundPacket {
        let mut buffer = pool.allocate();
        FrameCodec::new()
            .encode_into(type_name, payload, &mut buffer)
            .unwrap();
        OutboundPacket::new(buffer)
    }

    fn raw_packet(pool: &ObjectPool<ByteCursorBuffer>, bytes: &[u8]) -> OutboundPacket {
        let mut buffer = pool.allocate();
        buffer.write(bytes).unwrap();
        OutboundPacket::new(buffer)
    }

    #[test]
    fn test_packet_size() {
        let pool = buffer_pool();
        let packet = packet(&pool, "Msg", b"hello");
        assert_eq!(packet.size(), 8 + 4 + 3 + 5);
    }

    #[tokio::test]
    async fn test_send_writes_frame_and_recycles_buffer() {
        let pool = buffer_pool();
        let counters = Arc::new(Counters::default());
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, &WriterConfig::default(), counters.clone());

        handle.send(packet(&pool, "Msg", b"hello")).await.unwrap();

        let mut buf = vec![0u8; 20];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[12..15], b"Msg");
        assert_eq!(&buf[15..], b"hello");

        // Give the writer a moment to drop the batch after flushing
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.available(), 4);
        assert_eq!(handle.pending_count(), 0);
        assert_eq!(counters.snapshot().frames_sent, 1);
        assert_eq!(counters.snapshot().bytes_sent, 20);
    }

    #[tokio::test]
    async fn test_writer_preserves_queue_order() {
        let pool = buffer_pool();
        let (client, mut server) = duplex(4096);
        let (handle, _task) =
            spawn_writer_task(client, &WriterConfig::default(), Arc::new(Counters::default()));

        for i in 0..10u8 {
            handle.send(raw_packet(&pool, &[i; 3])).await.unwrap();
        }

        let mut buf = vec![0u8; 30];
        server.read_exact(&mut buf).await.unwrap();
        for (i, chunk) in buf.chunks(3).enumerate() {
            assert_eq!(chunk, &[i as u8; 3]);
        }
    }

    #[tokio::test]
    async fn test_wrapped_packet_buffer() {
        let pool = ObjectPool::new(|| ByteCursorBuffer::with_capacity(8));
        let mut buffer = pool.allocate();
        buffer.write(b"xxxxxx").unwrap();
        buffer.advance_front(6).unwrap();
        buffer.write(b"abcdef").unwrap();

        let mut out = Cursor::new(Vec::new());
        let written = write_batch(&mut out, &[OutboundPacket::new(buffer)])
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(out.into_inner(), b"abcdef");
    }

    #[tokio::test]
    async fn test_partial_writes_resume() {
        let pool = buffer_pool();
        // Tiny duplex forces short writes
        let (client, mut server) = duplex(5);
        let (handle, _task) =
            spawn_writer_task(client, &WriterConfig::default(), Arc::new(Counters::default()));

        handle.send(raw_packet(&pool, b"0123456789")).await.unwrap();
        handle.send(raw_packet(&pool, b"abcdefghij")).await.unwrap();

        let mut buf = vec![0u8; 20];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], b"0123456789abcdefghij");
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let pool = buffer_pool();
        let config = WriterConfig {
            max_pending_frames: 1,
            channel_capacity: 4,
            backpressure_timeout_ms: 1_000,
        };
        let (handle, _queue) = packet_channel(&config);

        handle.try_send(raw_packet(&pool, b"a")).unwrap();
        assert!(handle.is_backpressure_active());

        let result = handle.try_send(raw_packet(&pool, b"b"));
        assert!(matches!(result, Err(FramelinkError::BackpressureTimeout)));
        // Rejected packet went straight back to the pool
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_send_times_out_under_backpressure() {
        let pool = buffer_pool();
        let config = WriterConfig {
            max_pending_frames: 1,
            channel_capacity: 4,
            backpressure_timeout_ms: 20,
        };
        let (handle, _queue) = packet_channel(&config);

        handle.send(raw_packet(&pool, b"a")).await.unwrap();
        let result = handle.send(raw_packet(&pool, b"b")).await;
        assert!(matches!(result, Err(FramelinkError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_after_queue_dropped() {
        let pool = buffer_pool();
        let (handle, queue) = packet_channel(&WriterConfig::default());
        drop(queue);

        let result = handle.send(raw_packet(&pool, b"a")).await;
        assert!(matches!(result, Err(FramelinkError::ConnectionClosed)));
        assert!(handle.is_closed());
        assert_eq!(handle.pending_count(), 0);
    }

    #[test]
    fn test_build_remaining_slices() {
        let pool = buffer_pool();
        let batch = vec![raw_packet(&pool, b"hello"), raw_packet(&pool, b"world")];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"lo");

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"world");
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) =
            spawn_writer_task(client, &WriterConfig::default(), Arc::new(Counters::default()));

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_ends_task() {
        let pool = buffer_pool();
        let (client, server) = duplex(64);
        drop(server);
        let (handle, task) =
            spawn_writer_task(client, &WriterConfig::default(), Arc::new(Counters::default()));

        handle.send(raw_packet(&pool, b"doomed")).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(FramelinkError::SocketFault(_))));
    }
}
