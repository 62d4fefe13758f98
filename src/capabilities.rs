//! The target hardware's fixed resource limits, supplied by the caller (§6.6). The
//! combiner treats these as opaque numbers; it never hardcodes a figure for any
//! particular chip revision.

/// Queried once per run and assumed constant for its duration.
pub trait HardwareCapabilities: Send + Sync {
    /// Total usable scratchpad bytes per SRAM bank.
    fn total_sram_size(&self) -> u64;
    /// Number of independent SRAM banks the allocator must plan across.
    fn num_srams(&self) -> u32;
    /// Largest PLE kernel code size the SRAM reserves room for.
    fn max_ple_size(&self) -> u64;
}

/// A fixed set of capabilities, for tests and simple embedders that don't need to query
/// live hardware.
#[derive(Debug, Copy, Clone)]
pub struct FixedCapabilities {
    pub total_sram_size: u64,
    pub num_srams: u32,
    pub max_ple_size: u64,
}

impl HardwareCapabilities for FixedCapabilities {
    fn total_sram_size(&self) -> u64 {
        self.total_sram_size
    }

    fn num_srams(&self) -> u32 {
        self.num_srams
    }

    fn max_ple_size(&self) -> u64 {
        self.max_ple_size
    }
}

#[cfg(test)]
pub(crate) const TEST_CAPABILITIES: FixedCapabilities = FixedCapabilities {
    total_sram_size: 1024 * 1024,
    num_srams: 4,
    max_ple_size: 64 * 1024,
};
