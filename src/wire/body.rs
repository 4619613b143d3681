use std::marker::PhantomData;

use byteorder::ByteOrder;
use log::trace;

use crate::align::{align_up, padding};
use crate::error::{Error, Result};

/// DBus caps a single array's payload at 2^26 bytes.
pub(crate) const MAX_ARRAY_LEN: u32 = 1 << 26;

/// Encode-side cursor over a message body being built.
///
/// Offsets are absolute: a DBus body always starts on an 8 byte boundary,
/// so alignment within the buffer equals alignment on the wire. Container
/// state is a mark taken before the container's first byte (padding
/// included); [`BodyBuf::abandon`] truncates back to it, which is what
/// makes a failed container leave no bytes behind.
pub(crate) struct BodyBuf {
    data: Vec<u8>,
}

/// Backfill state for an open array: where the length word sits and where
/// the counted payload begins (after the element-alignment padding, which
/// is not part of the length).
#[derive(Clone, Copy, Debug)]
pub(crate) struct ArrayMark {
    len_pos: usize,
    start: usize,
}

impl BodyBuf {
    pub(crate) fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Current length, used as the abandon point for a container about to
    /// be opened.
    pub(crate) fn mark(&self) -> usize {
        self.data.len()
    }

    /// Drop everything written since `mark`. The cursor is back in the
    /// state it had before the container opened; a fresh encode from here
    /// produces bytes identical to one that never failed.
    pub(crate) fn abandon(&mut self, mark: usize) {
        trace!("abandoning container, truncating {} -> {}", self.data.len(), mark);
        self.data.truncate(mark);
    }

    fn grow(&mut self, extra: usize) -> Result<()> {
        self.data.try_reserve(extra)?;
        Ok(())
    }

    pub(crate) fn pad_to(&mut self, alignment: usize) -> Result<()> {
        let pad = padding(self.data.len(), alignment);
        self.grow(pad)?;
        self.data.resize(self.data.len() + pad, 0);
        Ok(())
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.grow(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Open an array container: 4-aligned length word (backfilled on
    /// close), then padding to the element alignment.
    pub(crate) fn open_array(&mut self, element_alignment: usize) -> Result<ArrayMark> {
        self.pad_to(4)?;
        let len_pos = self.data.len();
        self.push_bytes(&[0u8; 4])?;
        self.pad_to(element_alignment)?;
        Ok(ArrayMark {
            len_pos,
            start: self.data.len(),
        })
    }

    pub(crate) fn close_array<B: ByteOrder>(&mut self, mark: ArrayMark) -> Result<()> {
        let len = self.data.len() - mark.start;
        if len > MAX_ARRAY_LEN as usize {
            return Err(Error::ArrayTooLong(len as u32));
        }
        B::write_u32(&mut self.data[mark.len_pos..mark.len_pos + 4], len as u32);
        Ok(())
    }
}

/// Decode-side cursor over a received message body.
pub(crate) struct BodyReader<'de, B: ByteOrder> {
    data: &'de [u8],
    ix: usize,
    phantom: PhantomData<B>,
}

impl<'de, B: ByteOrder> BodyReader<'de, B> {
    pub(crate) fn new(data: &'de [u8]) -> Self {
        Self {
            data,
            ix: 0,
            phantom: PhantomData,
        }
    }

    pub(crate) fn ix(&self) -> usize {
        self.ix
    }

    pub(crate) fn total_len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn align_to(&mut self, alignment: usize) -> Result<()> {
        let new_ix = align_up(self.ix, alignment);
        if new_ix > self.data.len() {
            return Err(Error::ShortRead {
                wanted: new_ix - self.ix,
                ix: self.ix,
            });
        }
        self.ix = new_ix;
        Ok(())
    }

    pub(crate) fn read(&mut self, len: usize) -> Result<&'de [u8]> {
        let end = self.ix.checked_add(len).ok_or(Error::LengthOverflow)?;
        if end > self.data.len() {
            return Err(Error::ShortRead {
                wanted: len,
                ix: self.ix,
            });
        }
        trace!("read {} bytes at {}", len, self.ix);
        let slice = &self.data[self.ix..end];
        self.ix = end;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(B::read_u16(self.read(2)?))
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16> {
        Ok(B::read_i16(self.read(2)?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(B::read_u32(self.read(4)?))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(B::read_i32(self.read(4)?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(B::read_u64(self.read(8)?))
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        Ok(B::read_i64(self.read(8)?))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(B::read_f64(self.read(8)?))
    }

    /// The body must be consumed exactly; trailing bytes mean the caller's
    /// declared argument list is short of what the peer sent.
    pub(crate) fn finish(&self) -> Result<()> {
        let leftover = self.data.len() - self.ix;
        if leftover != 0 {
            return Err(Error::TrailingBody(leftover));
        }
        Ok(())
    }
}
