use bytes::BytesMut;

/// Source of scratch buffers for frame encoding. Shared across connections,
/// so implementations can recycle memory; the endpoint freezes each buffer
/// into an owned `Bytes` view before it reaches the wire, which is always
/// zero-copy.
pub trait BufferPool: Send + Sync {
    /// Hands out a writable buffer with at least `capacity` bytes reserved.
    fn acquire(&self, capacity: usize) -> BytesMut;
}

/// Default pool that just allocates. Good enough until profiling says
/// otherwise.
#[derive(Debug, Default)]
pub struct HeapBufferPool;

impl BufferPool for HeapBufferPool {
    fn acquire(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }
}
