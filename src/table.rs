use std::ops::Index;

use crate::utils::MyHash;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    next: usize,
}

impl<T> Entry<T> {
    /// Create a new cell with the given value.
    pub fn new(value: T) -> Self {
        Self { value, next: 0 }
    }

    /// Get the reference to the value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Get the index of the next cell.
    pub fn next(&self) -> usize {
        self.next
    }
    /// Set the index of the next cell.
    pub fn set_next(&mut self, next: usize) {
        self.next = next;
    }
}

/// Append-only unique table.
///
/// Every distinct value is stored exactly once and addressed by a stable
/// index starting from 1. Index 0 is the empty-chain sentry and never refers
/// to a value.
#[derive(Debug, Clone)]
pub struct Table<T> {
    data: Vec<Entry<T>>,

    buckets: Vec<usize>,
    bitmask: u64,
}

impl<T> Table<T> {
    /// Create a new table with `2^bits` buckets.
    ///
    /// The number of buckets doubles whenever the table holds more values
    /// than buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bucket bits should be in the range 0..=31");

        let buckets_size = 1 << bits;
        Self {
            data: Vec::new(),
            buckets: vec![0; buckets_size],
            bitmask: (buckets_size - 1) as u64,
        }
    }

    /// Get the number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }
    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the reference to the value at the given index.
    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        self.data[index - 1].value()
    }

    /// Get the index of the next cell in the same bucket.
    pub fn next(&self, index: usize) -> usize {
        assert_ne!(index, 0, "Index is 0");
        self.data[index - 1].next()
    }
    fn set_next(&mut self, index: usize, next: usize) {
        assert_ne!(index, 0, "Index is 0");
        self.data[index - 1].set_next(next);
    }

    /// Iterate over `(index, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.data.iter().enumerate().map(|(i, e)| (i + 1, e.value()))
    }

    /// Remove all values. Previously returned indices become invalid.
    pub fn clear(&mut self) {
        self.data.clear();
        self.buckets.iter_mut().for_each(|b| *b = 0);
    }
}

impl<T> Table<T>
where
    T: MyHash + Eq,
{
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Find the index of the given value, if present.
    pub fn find(&self, value: &T) -> Option<usize> {
        let mut index = self.buckets[self.bucket_index(value)];
        while index != 0 {
            if value == self.value(index) {
                return Some(index);
            }
            index = self.next(index);
        }
        None
    }

    /// Put a value into the table and return its index.
    pub fn put(&mut self, value: T) -> usize {
        self.insert(value).0
    }

    /// Put a value into the table, returning its index and whether it was newly added.
    pub fn insert(&mut self, value: T) -> (usize, bool) {
        if let Some(index) = self.find(&value) {
            // The value already exists.
            return (index, false);
        }

        let bucket_index = self.bucket_index(&value);
        self.data.push(Entry::new(value));
        let i = self.data.len();

        // Prepend to the bucket chain.
        let head = self.buckets[bucket_index];
        self.set_next(i, head);
        self.buckets[bucket_index] = i;

        if self.data.len() > self.buckets.len() {
            self.grow();
        }

        (i, true)
    }

    fn grow(&mut self) {
        let buckets_size = self.buckets.len() * 2;
        log::debug!("Growing table buckets to {}", buckets_size);
        self.buckets = vec![0; buckets_size];
        self.bitmask = (buckets_size - 1) as u64;
        for i in 1..=self.data.len() {
            let bucket_index = self.bucket_index(self.value(i));
            let head = self.buckets[bucket_index];
            self.set_next(i, head);
            self.buckets[bucket_index] = i;
        }
    }
}

impl<T> Index<usize> for Table<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.value(index)
    }
}
