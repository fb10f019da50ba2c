/// A unique number used internally by the kernel to identify CPUs.
///
/// This is usually but not necessarily the same as the hardware CPU ID.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct LogicalCpuId(u32);

impl LogicalCpuId {
    /// The logical CPU ID of the bootstrap processor.
    pub const BSP: Self = Self::new(0);

    /// Creates a new logical CPU ID.
    pub const fn new(inner: u32) -> Self {
        Self(inner)
    }
    /// Returns the inner value of the logical CPU ID.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for LogicalCpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[logical cpu #{}]", self.0)
    }
}
impl core::fmt::Display for LogicalCpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
