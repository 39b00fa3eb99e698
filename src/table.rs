use crate::utils::MyHash;

struct Entry<T> {
    value: T,
    next: usize,
    hashed: bool,
}

/// Hash-consing storage: every distinct value is stored exactly once.
///
/// Index 0 is a sentinel and never holds a value, so `0` doubles as the
/// end-of-chain marker inside buckets. Values are never removed; the table
/// lives as long as the snapshot it encodes.
pub struct Table<T> {
    data: Vec<Entry<T>>,
    buckets: Vec<usize>,
    bitmask: u64,
}

impl<T> Table<T>
where
    T: Default,
{
    /// Create a new table pre-sized for `2^bits` values.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Storage bits should be in the range 0..=31");

        let mut data = Vec::with_capacity(1 << bits);
        data.push(Entry {
            value: T::default(),
            next: 0,
            hashed: false,
        });

        let buckets_size = 1usize << bits.clamp(4, 20);
        Self {
            data,
            buckets: vec![0; buckets_size],
            bitmask: (buckets_size - 1) as u64,
        }
    }
}

impl<T> Table<T> {
    /// Number of stored values (the sentinel excluded).
    pub fn size(&self) -> usize {
        self.data.len() - 1
    }

    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }

    pub fn next(&self, index: usize) -> usize {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next
    }

    /// Append a value outside of any bucket and return its index.
    ///
    /// Used for terminals, which are never looked up by value.
    pub fn add(&mut self, value: T) -> usize {
        self.data.push(Entry {
            value,
            next: 0,
            hashed: false,
        });
        self.data.len() - 1
    }
}

impl<T> Table<T>
where
    T: MyHash + Eq,
{
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Put a value into the table and return its index, reusing an existing
    /// equal value when there is one.
    pub fn put(&mut self, value: T) -> usize {
        let bucket = self.bucket_index(&value);
        let mut index = self.buckets[bucket];
        while index != 0 {
            if self.data[index].value == value {
                return index;
            }
            index = self.data[index].next;
        }

        let head = self.buckets[bucket];
        self.data.push(Entry {
            value,
            next: head,
            hashed: true,
        });
        let i = self.data.len() - 1;
        self.buckets[bucket] = i;

        if self.size() > 2 * self.buckets.len() {
            self.grow();
        }
        i
    }

    fn grow(&mut self) {
        let buckets_size = self.buckets.len() * 2;
        self.buckets = vec![0; buckets_size];
        self.bitmask = (buckets_size - 1) as u64;
        for i in 1..self.data.len() {
            self.data[i].next = 0;
        }
        // Terminals were added outside of buckets and must stay outside.
        for i in 1..self.data.len() {
            if !self.data[i].hashed {
                continue;
            }
            let bucket = self.bucket_index(&self.data[i].value);
            self.data[i].next = self.buckets[bucket];
            self.buckets[bucket] = i;
        }
    }
}
