//! Reusable message buffer and its lifecycle context.
//!
//! Each I/O session owns a [`MemoryContext`] and passes it by reference to
//! whatever needs the message buffer, so two sessions never share one.

use super::{zeroed, BufferError, DEFAULT_BUFFER_SIZE};

/// A fixed-capacity message: a kind tag, a payload length, and the data block.
#[derive(Debug)]
pub struct Message {
    kind: u8,
    length: usize,
    data: Vec<u8>,
}

impl Message {
    fn allocate() -> Result<Self, BufferError> {
        Ok(Self {
            kind: 0,
            length: 0,
            data: zeroed(DEFAULT_BUFFER_SIZE)?,
        })
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The whole data block.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The first `length` bytes of the data block.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Store `payload` under `kind`. Payloads larger than the data block are rejected.
    pub fn set_payload(&mut self, kind: u8, payload: &[u8]) -> Result<(), BufferError> {
        if payload.len() > self.capacity() {
            return Err(BufferError::PayloadTooLarge {
                len: payload.len(),
                capacity: self.capacity(),
            });
        }

        self.data[..payload.len()].copy_from_slice(payload);
        self.kind = kind;
        self.length = payload.len();
        Ok(())
    }

    /// Zero the header and the data block.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.kind = 0;
        self.length = 0;
    }
}

/// Owner of one [`Message`], with an explicit init/destroy lifecycle.
///
/// Accessing the message before [`init`](Self::init) or after
/// [`destroy`](Self::destroy) returns [`BufferError::Uninitialized`].
#[derive(Debug, Default)]
pub struct MemoryContext {
    message: Option<Message>,
}

impl MemoryContext {
    pub const fn new() -> Self {
        Self { message: None }
    }

    /// Allocate the message on first call, then reset it.
    pub fn init(&mut self) -> Result<&mut Message, BufferError> {
        let message = match self.message.take() {
            Some(message) => message,
            None => Message::allocate()?,
        };
        let message = self.message.insert(message);
        message.reset();
        Ok(message)
    }

    pub fn is_initialized(&self) -> bool {
        self.message.is_some()
    }

    pub fn message(&mut self) -> Result<&mut Message, BufferError> {
        self.message.as_mut().ok_or(BufferError::Uninitialized)
    }

    /// Clear the message before the next logical use.
    pub fn reset(&mut self) -> Result<(), BufferError> {
        self.message()?.reset();
        Ok(())
    }

    /// Release the message. Calling this again is a no-op.
    pub fn destroy(&mut self) {
        self.message = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_before_init_is_rejected() {
        let mut context = MemoryContext::new();
        assert!(!context.is_initialized());
        assert_eq!(context.message().unwrap_err(), BufferError::Uninitialized);
        assert_eq!(context.reset().unwrap_err(), BufferError::Uninitialized);
    }

    #[test]
    fn test_init_allocates_zeroed_message() {
        let mut context = MemoryContext::new();
        let message = context.init().unwrap();

        assert_eq!(message.kind(), 0);
        assert_eq!(message.length(), 0);
        assert_eq!(message.capacity(), DEFAULT_BUFFER_SIZE);
        assert!(message.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_reinit_resets_existing_message() {
        let mut context = MemoryContext::new();
        context.init().unwrap().set_payload(b'Q', b"select 1").unwrap();

        let ptr = context.message().unwrap().data().as_ptr();
        let message = context.init().unwrap();

        assert_eq!(message.data().as_ptr(), ptr);
        assert_eq!(message.kind(), 0);
        assert!(message.payload().is_empty());
        assert!(message.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_set_payload_and_reset() {
        let mut context = MemoryContext::new();
        context.init().unwrap();

        let message = context.message().unwrap();
        message.set_payload(b'D', b"payload").unwrap();
        assert_eq!(message.kind(), b'D');
        assert_eq!(message.payload(), b"payload");

        context.reset().unwrap();
        let message = context.message().unwrap();
        assert_eq!(message.length(), 0);
        assert!(message.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let mut context = MemoryContext::new();
        let message = context.init().unwrap();
        message.set_payload(b'A', b"abc").unwrap();

        let oversized = vec![1u8; DEFAULT_BUFFER_SIZE + 1];
        let err = message.set_payload(b'B', &oversized).unwrap_err();
        assert!(matches!(err, BufferError::PayloadTooLarge { .. }));
        assert_eq!(message.kind(), b'A');
        assert_eq!(message.payload(), b"abc");
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut context = MemoryContext::new();
        context.init().unwrap();

        context.destroy();
        context.destroy();
        assert!(!context.is_initialized());
        assert_eq!(context.message().unwrap_err(), BufferError::Uninitialized);

        assert!(context.init().is_ok());
    }
}
