//! Immutable, reference-counted byte chunks.

use std::fmt;
use std::rc::Rc;

/// An immutable run of bytes with a shared backing allocation.
///
/// `begin`/`end` cursors select the readable range, so a partial consume
/// narrows the view without touching the bytes. Cloning a block produces a
/// new handle onto the same backing allocation; the bytes are never copied
/// after construction.
#[derive(Clone)]
pub struct Block {
    data: Rc<[u8]>,
    begin: usize,
    end: usize,
}

impl Block {
    /// Copy a call-scoped buffer into an owned block.
    ///
    /// Transport callbacks lend buffers that are only valid for the duration
    /// of the call; anything that may outlive the callback must come through
    /// here.
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self {
            data: Rc::from(bytes),
            begin: 0,
            end: bytes.len(),
        }
    }

    pub fn empty() -> Self {
        Self::copy_from(&[])
    }

    /// The readable range.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Advance the read cursor after a partial consume.
    ///
    /// Saturates at the end of the block.
    pub fn advance(&mut self, n: usize) {
        self.begin = self.end.min(self.begin + n);
    }

    /// True when both handles view the same backing allocation.
    pub fn shares_backing(&self, other: &Block) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl From<Vec<u8>> for Block {
    fn from(bytes: Vec<u8>) -> Self {
        let end = bytes.len();
        Self {
            data: Rc::from(bytes),
            begin: 0,
            end,
        }
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Block {}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len())
            .field("begin", &self.begin)
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_from_owns_the_bytes() {
        let source = vec![1u8, 2, 3];
        let block = Block::copy_from(&source);
        drop(source);
        assert_eq!(block.as_bytes(), &[1, 2, 3]);
        assert_eq!(block.len(), 3);
        assert!(!block.is_empty());
    }

    #[test]
    fn clone_shares_backing() {
        let a = Block::copy_from(b"hello");
        let b = a.clone();
        assert!(a.shares_backing(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn advance_narrows_the_view() {
        let mut block = Block::copy_from(b"abcdef");
        block.advance(2);
        assert_eq!(block.as_bytes(), b"cdef");
        block.advance(100);
        assert!(block.is_empty());
        assert_eq!(block.as_bytes(), b"");
    }

    #[test]
    fn from_vec_does_not_recopy() {
        let block = Block::from(b"xyz".to_vec());
        assert_eq!(block.as_bytes(), b"xyz");
    }
}
