//! Per-invocation capture of script `print` output
//!
//! Each execution context owns one buffer; nothing is shared between
//! invocations, so concurrent evaluations never see each other's text.

use crate::error::RuntimeFault;

/// Ordered, byte-bounded list of printed fragments
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    fragments: Vec<String>,
    bytes: usize,
    capacity: usize,
}

impl OutputBuffer {
    /// Empty buffer accepting at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        OutputBuffer {
            fragments: Vec::new(),
            bytes: 0,
            capacity,
        }
    }

    /// Discard everything collected so far
    pub fn reset(&mut self) {
        self.fragments.clear();
        self.bytes = 0;
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Append one fragment.
    ///
    /// # Errors
    /// A `Limit` fault once the total would exceed the capacity; the
    /// fragment is not recorded.
    pub fn write(&mut self, fragment: &str) -> Result<(), RuntimeFault> {
        if self.bytes + fragment.len() > self.capacity {
            return Err(RuntimeFault::limit(format!(
                "printed output exceeds the limit of {} bytes",
                self.capacity
            )));
        }
        self.bytes += fragment.len();
        self.fragments.push(fragment.to_string());
        Ok(())
    }

    /// All fragments joined in write order
    pub fn collect(&self) -> String {
        self.fragments.concat()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn len(&self) -> usize {
        self.bytes
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        OutputBuffer::new(crate::config::ExecutionLimits::default().max_output_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;

    #[test]
    fn test_collect_joins_in_order() {
        let mut buffer = OutputBuffer::new(1024);
        for fragment in ["weight", " ", "84.0", "\n"] {
            buffer.write(fragment).unwrap();
        }
        assert_eq!(buffer.collect(), "weight 84.0\n");
        assert_eq!(buffer.len(), 12);
    }

    #[test]
    fn test_reset_empties_buffer() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.write("left over").unwrap();
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.collect(), "");
    }

    #[test]
    fn test_capacity_enforced() {
        let mut buffer = OutputBuffer::new(8);
        buffer.write("12345").unwrap();
        let err = buffer.write("6789").unwrap_err();
        assert_eq!(err.kind, FaultKind::Limit);
        assert_eq!(buffer.collect(), "12345");
    }
}
