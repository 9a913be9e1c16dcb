/// A byte buffer that can be delivered to the system under test.
pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize {
        self.as_bytes().len()
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Input for &'static [u8] {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

impl Input for String {
    fn as_bytes(&self) -> &[u8] {
        str::as_bytes(self)
    }
}
