//! Bounded line buffer for captured server output.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of lines kept per server instance.
pub const DEFAULT_LOG_LINES: usize = 1000;

/// Fixed-capacity ring of text lines.
///
/// Once full, each write overwrites the oldest line. Reads always return
/// lines oldest-first regardless of where the write cursor sits.
#[derive(Debug)]
pub struct LogBuffer {
    inner: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    lines: Vec<String>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl Ring {
    fn start(&self) -> usize {
        if self.len == self.capacity {
            self.head
        } else {
            0
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &String> {
        let start = self.start();
        (0..self.len).map(move |i| &self.lines[(start + i) % self.capacity])
    }
}

impl LogBuffer {
    /// Create an empty buffer holding at most `capacity` lines (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Ring {
                lines: vec![String::new(); capacity],
                capacity,
                head: 0,
                len: 0,
            }),
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        // A panicking writer cannot leave the ring half-updated in a way that
        // breaks the index arithmetic, so keep serving reads.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line, overwriting the oldest one when full.
    pub fn write(&self, line: impl Into<String>) {
        let mut ring = self.ring();
        let head = ring.head;
        ring.lines[head] = line.into();
        ring.head = (head + 1) % ring.capacity;
        if ring.len < ring.capacity {
            ring.len += 1;
        }
    }

    /// Snapshot of the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.ring().ordered().cloned().collect()
    }

    /// Drop every buffered line.
    pub fn clear(&self) {
        let mut ring = self.ring();
        ring.head = 0;
        ring.len = 0;
        for line in ring.lines.iter_mut() {
            line.clear();
        }
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.ring().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring().capacity
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LINES)
    }
}

/// Every line followed by a newline, oldest first.
impl fmt::Display for LogBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring();
        for line in ring.ordered() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_buffer() {
        let buffer = LogBuffer::new(3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
        assert!(buffer.lines().is_empty());
        assert_eq!(buffer.to_string(), "");
    }

    #[test]
    fn test_partial_fill_keeps_order() {
        let buffer = LogBuffer::new(4);
        buffer.write("a");
        buffer.write("b");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.lines(), vec!["a", "b"]);
        assert_eq!(buffer.to_string(), "a\nb\n");
    }

    #[test]
    fn test_wraparound_keeps_last_capacity_lines() {
        for capacity in 1..6 {
            for extra in 0..(capacity * 2 + 1) {
                let buffer = LogBuffer::new(capacity);
                let total = capacity + extra;
                for i in 0..total {
                    buffer.write(format!("line {}", i));
                }
                let expected: Vec<String> = (total - capacity..total)
                    .map(|i| format!("line {}", i))
                    .collect();
                assert_eq!(buffer.lines(), expected, "capacity {capacity}, writes {total}");
                assert_eq!(buffer.len(), capacity);
            }
        }
    }

    #[test]
    fn test_clear_resets() {
        let buffer = LogBuffer::new(2);
        buffer.write("x");
        buffer.write("y");
        buffer.write("z");
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.write("after");
        assert_eq!(buffer.lines(), vec!["after"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = LogBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.write("only");
        buffer.write("latest");
        assert_eq!(buffer.lines(), vec!["latest"]);
    }

    #[test]
    fn test_single_writer_many_readers() {
        let buffer = Arc::new(LogBuffer::new(50));
        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..500 {
                    buffer.write(format!("{}", i));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let lines = buffer.lines();
                        assert!(lines.len() <= 50);
                        let numbers: Vec<u32> =
                            lines.iter().map(|l| l.parse().unwrap()).collect();
                        assert!(numbers.windows(2).all(|w| w[1] == w[0] + 1));
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        let last: Vec<String> = (450..500).map(|i| i.to_string()).collect();
        assert_eq!(buffer.lines(), last);
    }
}
