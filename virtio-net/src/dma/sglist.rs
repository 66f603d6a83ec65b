//! Scatter list of device-visible fragments.

/// Upper bound on fragments per request (header + one data buffer).
pub const MAX_FRAGMENTS: usize = 2;

/// Which side of the ring may write the fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Device reads it (transmit).
    #[default]
    DeviceReadable,
    /// Device writes it (receive).
    DeviceWritable,
}

/// One contiguous region: physical address, length, direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fragment {
    pub addr: u64,
    pub len: u32,
    pub dir: Direction,
}

impl Fragment {
    pub const fn new(addr: u64, len: u32, dir: Direction) -> Self {
        Self { addr, len, dir }
    }

    pub fn is_writable(&self) -> bool {
        self.dir == Direction::DeviceWritable
    }
}

/// Ordered fragments of one descriptor chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScatterList {
    frags: [Fragment; MAX_FRAGMENTS],
    len: usize,
}

impl ScatterList {
    pub const fn new() -> Self {
        Self {
            frags: [Fragment::new(0, 0, Direction::DeviceReadable); MAX_FRAGMENTS],
            len: 0,
        }
    }

    /// Append a fragment. Returns `false` when the list is full.
    pub fn push(&mut self, frag: Fragment) -> bool {
        if self.len == MAX_FRAGMENTS {
            return false;
        }
        self.frags[self.len] = frag;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[Fragment] {
        &self.frags[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.as_slice().iter()
    }

    /// Total number of fragments (descriptor slots needed).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of device-writable fragments.
    pub fn writable_count(&self) -> usize {
        self.iter().filter(|f| f.is_writable()).count()
    }

    /// Sum of fragment lengths.
    pub fn total_len(&self) -> u64 {
        self.iter().map(|f| u64::from(f.len)).sum()
    }
}
