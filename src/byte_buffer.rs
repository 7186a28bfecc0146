use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// An append-only FIFO of bytes with a read cursor.
///
/// Ported from the Python source's `ByteBuffer`: data is appended at the
/// tail and consumed from the head. There is no random access and no
/// mutation in the middle — only append and drain.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut inner = BytesMut::with_capacity(data.len());
        inner.put(data);
        Self { inner }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.inner.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Consume and return `n` bytes from the head. Fails on underflow.
    pub fn read(&mut self, n: usize) -> Result<Bytes, CodecError> {
        if self.inner.len() < n {
            return Err(CodecError::Underflow {
                needed: n,
                remaining: self.inner.len(),
            });
        }
        Ok(self.inner.split_to(n).freeze())
    }

    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        if self.inner.len() < n {
            return Err(CodecError::Underflow {
                needed: n,
                remaining: self.inner.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.inner.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.inner.get_u64())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.inner.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.inner.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.ensure(8)?;
        Ok(self.inner.get_f64())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn append_then_read_drains_head() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1, 2, 3, 4]);
        assert_eq!(buf.len(), 4);
        let head = buf.read(2).unwrap();
        assert_eq!(&head[..], &[1, 2]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn read_past_end_is_underflow() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1]);
        assert!(matches!(
            buf.read(4),
            Err(CodecError::Underflow {
                needed: 4,
                remaining: 1
            })
        ));
    }

    #[test]
    fn typed_reads_are_big_endian() {
        let mut buf = ByteBuffer::new();
        buf.append(&1234567890i64.to_be_bytes());
        buf.append(&3.14159265358979323846f64.to_be_bytes());
        assert_eq!(buf.read_i64().unwrap(), 1234567890);
        assert_eq!(buf.read_f64().unwrap(), 3.14159265358979323846);
        assert!(buf.is_empty());
    }
}
