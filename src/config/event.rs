use crate::ffi::bindings as b;

/// Events that can be sampled.
///
/// Hardware events need a PMU exposed by the host (often missing in VMs),
/// software events are always provided by the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    Cycles,
    Instructions,
    CacheReferences,
    CacheMisses,
    BranchInstructions,
    BranchMisses,
    StalledCyclesBackend,

    CpuClock,
    TaskClock,
    PageFaults,
    ContextSwitches,

    /// Raw PMU event, the value has a CPU-specific meaning.
    Raw(u64),
}

impl EventKind {
    /// Decodes the integer event code used across the C ABI.
    ///
    /// `raw` is only consulted for [`EventKind::Raw`].
    pub fn from_code(code: u32, raw: u64) -> Option<Self> {
        let kind = match code {
            1 => Self::Cycles,
            2 => Self::Instructions,
            3 => Self::CacheReferences,
            4 => Self::CacheMisses,
            5 => Self::BranchInstructions,
            6 => Self::BranchMisses,
            7 => Self::StalledCyclesBackend,
            16 => Self::CpuClock,
            17 => Self::TaskClock,
            18 => Self::PageFaults,
            19 => Self::ContextSwitches,
            255 => Self::Raw(raw),
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Cycles => 1,
            Self::Instructions => 2,
            Self::CacheReferences => 3,
            Self::CacheMisses => 4,
            Self::BranchInstructions => 5,
            Self::BranchMisses => 6,
            Self::StalledCyclesBackend => 7,
            Self::CpuClock => 16,
            Self::TaskClock => 17,
            Self::PageFaults => 18,
            Self::ContextSwitches => 19,
            Self::Raw(_) => 255,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.perf_type() != b::perf_type_id_PERF_TYPE_SOFTWARE
    }

    pub(crate) fn perf_type(&self) -> u32 {
        match self {
            Self::CpuClock | Self::TaskClock | Self::PageFaults | Self::ContextSwitches => {
                b::perf_type_id_PERF_TYPE_SOFTWARE
            }
            Self::Raw(_) => b::perf_type_id_PERF_TYPE_RAW,
            _ => b::perf_type_id_PERF_TYPE_HARDWARE,
        }
    }

    pub(crate) fn perf_config(&self) -> u64 {
        match self {
            Self::Cycles => b::perf_hw_id_PERF_COUNT_HW_CPU_CYCLES as u64,
            Self::Instructions => b::perf_hw_id_PERF_COUNT_HW_INSTRUCTIONS as u64,
            Self::CacheReferences => b::perf_hw_id_PERF_COUNT_HW_CACHE_REFERENCES as u64,
            Self::CacheMisses => b::perf_hw_id_PERF_COUNT_HW_CACHE_MISSES as u64,
            Self::BranchInstructions => b::perf_hw_id_PERF_COUNT_HW_BRANCH_INSTRUCTIONS as u64,
            Self::BranchMisses => b::perf_hw_id_PERF_COUNT_HW_BRANCH_MISSES as u64,
            Self::StalledCyclesBackend => b::perf_hw_id_PERF_COUNT_HW_STALLED_CYCLES_BACKEND as u64,
            Self::CpuClock => b::perf_sw_ids_PERF_COUNT_SW_CPU_CLOCK as u64,
            Self::TaskClock => b::perf_sw_ids_PERF_COUNT_SW_TASK_CLOCK as u64,
            Self::PageFaults => b::perf_sw_ids_PERF_COUNT_SW_PAGE_FAULTS as u64,
            Self::ContextSwitches => b::perf_sw_ids_PERF_COUNT_SW_CONTEXT_SWITCHES as u64,
            Self::Raw(config) => *config,
        }
    }
}
