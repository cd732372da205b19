use crate::drivers::ScopeError;
/// Fixed-capacity circular queue. When full, `push` overwrites the oldest
/// element instead of failing.
///
/// Not synchronized; the acquisition loop is its only user.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    head: usize, // next write position
    tail: usize, // oldest element
    len: usize,
}
impl<T: Copy + Default> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Result<Self, ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::Config(
                "ring buffer capacity must be greater than zero".into(),
            ));
        }
        Ok(Self {
            slots: vec![T::default(); capacity],
            head: 0,
            tail: 0,
            len: 0,
        })
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }
    pub fn push(&mut self, item: T) {
        let capacity = self.slots.len();
        if self.is_full() {
            // Drop the oldest element.
            self.tail = (self.tail + 1) % capacity;
        } else {
            self.len += 1;
        }
        self.slots[self.head] = item;
        self.head = (self.head + 1) % capacity;
    }
    pub fn extend_from_slice(&mut self, items: &[T]) {
        for &item in items {
            self.push(item);
        }
    }
    pub fn pop(&mut self) -> Result<T, ScopeError> {
        if self.is_empty() {
            return Err(ScopeError::BufferEmpty);
        }
        let item = self.slots[self.tail];
        self.tail = (self.tail + 1) % self.slots.len();
        self.len -= 1;
        Ok(item)
    }
    /// Pops elements oldest-first until the buffer is empty.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.pop().ok())
    }
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
        self.slots.fill(T::default());
    }
}
