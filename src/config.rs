//! Configuration — tuning parameters for the collector.
//!
//! Mirrors the VM-visible configuration surface: every option is optional,
//! has a documented default, and can be overridden from the environment for
//! quick experimentation without rebuilding a host.

use crate::util::constants::{GB, KB, MB};

/// Latency mode requested by the host, trading throughput for pause time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyMode {
    #[default]
    Interactive,
    Batch,
    LowLatency,
    SustainedLowLatency,
    /// Allocations are served from a pre-reserved budget; no GC runs until
    /// the no-GC region ends or the budget is exhausted.
    NoGc,
}

/// When the large-object heap is compacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LohCompactionMode {
    #[default]
    Never,
    /// Compact on the next blocking gen-2 collection, then revert to
    /// `Never`. Consumed at the start of the plan phase.
    Once,
    /// Compact on every blocking gen-2 collection.
    Always,
}

/// Collector configuration. All fields are optional in spirit — `Default`
/// derives sensible values from the host's physical memory and core count —
/// but the struct itself has no `Option` noise for the common case.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Enable N-heap server mode (one heap per logical processor).
    ///
    /// Default: false (workstation mode, one shared heap).
    pub server_gc: bool,

    /// Enable the background collector for gen 2.
    ///
    /// Default: true.
    pub concurrent_gc: bool,

    /// Commit segment memory on NUMA-local nodes when available.
    ///
    /// Default: true.
    pub numa_aware: bool,

    /// Span Windows CPU groups in server mode. No effect on non-Windows
    /// targets; kept for configuration-surface parity.
    ///
    /// Default: false.
    pub cpu_group: bool,

    /// LOH compaction policy.
    ///
    /// Default: `Never`.
    pub loh_compaction_mode: LohCompactionMode,

    /// Requested latency/throughput tradeoff.
    ///
    /// Default: `Interactive`.
    pub latency_mode: LatencyMode,

    /// Segment size override. Must be at least 4 MiB and 1-MiB aligned.
    ///
    /// Default: 16 MiB for workstation mode, 4 MiB per heap in server mode.
    pub heap_segment_size: usize,

    /// Hard cap on total committed bytes across all heaps. `0` means no
    /// hard limit beyond available memory.
    ///
    /// Default: 0.
    pub heap_hard_limit: usize,

    /// Force frequent GCs for stress testing. Debug use only; adds
    /// significant overhead.
    ///
    /// Default: false.
    pub stress_heap: bool,

    /// Minimum heap size in bytes. The heap will not shrink below this.
    ///
    /// Default: 1/4 of `max_heap_size`, floored at 16 MiB.
    pub min_heap_size: usize,

    /// Maximum heap size in bytes (soft budget, distinct from
    /// `heap_hard_limit`, which is a hard commit cap).
    ///
    /// Default: half of physical memory, capped at 32 GiB.
    pub max_heap_size: usize,

    /// Gen 0 allocation budget in bytes, used to size the fast-path
    /// allocation quantum handed out by `refill`.
    ///
    /// Default: 256 KiB, doubled per logical core up to a cap.
    pub allocation_quantum: usize,

    /// Card size for the card table. Must be a power of two.
    ///
    /// Default: 512 bytes, matching the object-alignment-relative card
    /// shift used by the write barrier.
    pub card_size: usize,

    /// Tenuring threshold: number of minor collections an object survives
    /// before promotion out of gen 0/1.
    ///
    /// Default: 9.
    pub tenure_threshold: u8,

    /// Number of background GC worker threads. `None` auto-detects as
    /// `min(4, num_cpus / 2)`.
    ///
    /// Default: auto-detect.
    pub gc_threads: Option<usize>,

    /// Large-object threshold in bytes; allocations above this size bypass
    /// gen 0/1/2 entirely and go to the LOH.
    ///
    /// Default: 85,000 bytes.
    pub large_object_threshold: usize,

    /// Enable the software write-watch mechanism during concurrent
    /// collection instead of relying solely on the card table.
    ///
    /// Default: true.
    pub write_watch_enabled: bool,

    /// Enable the shadow-heap consistency checker. Significant overhead;
    /// debug builds only.
    ///
    /// Default: false.
    pub shadow_heap_enabled: bool,

    /// Emit verbose GC event logging (cycle/phase boundaries, pause
    /// durations) in addition to module-level `log` output.
    ///
    /// Default: false.
    pub verbose: bool,

    /// Collect pause-time histograms and per-generation counters.
    ///
    /// Default: true.
    pub stats_enabled: bool,

    /// Periodic GC interval in milliseconds. `0` disables periodic
    /// triggering; GC then runs only on budget exhaustion or explicit
    /// request.
    ///
    /// Default: 0.
    pub gc_interval_ms: u64,

    /// Unproductive-full-GC threshold: a blocking full collection that
    /// reclaims less than this fraction of the heap counts toward the
    /// `OutOfMemory-UnproductiveFullGc` failure path.
    ///
    /// Default: 0.03 (3%).
    pub min_productive_fraction: f32,
}

impl Default for GcConfig {
    fn default() -> Self {
        let cores = num_cpus::get();
        let total_memory = total_physical_memory();
        let max_heap = default_max_heap(total_memory);
        let min_heap = (max_heap / 4).max(16 * MB);

        GcConfig {
            server_gc: false,
            concurrent_gc: true,
            numa_aware: true,
            cpu_group: false,
            loh_compaction_mode: LohCompactionMode::Never,
            latency_mode: LatencyMode::Interactive,
            heap_segment_size: 16 * MB,
            heap_hard_limit: 0,
            stress_heap: false,
            min_heap_size: min_heap,
            max_heap_size: max_heap,
            allocation_quantum: (256 * KB).saturating_mul(cores.min(8) as usize).min(4 * MB),
            card_size: 512,
            tenure_threshold: 9,
            gc_threads: Some((cores / 2).max(1).min(4)),
            large_object_threshold: 85_000,
            write_watch_enabled: true,
            shadow_heap_enabled: false,
            verbose: false,
            stats_enabled: true,
            gc_interval_ms: 0,
            min_productive_fraction: 0.03,
        }
    }
}

impl GcConfig {
    /// Validate all fields, rejecting the ranges the background collector
    /// and segment allocator cannot safely operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_size == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_size must be > 0".into(),
            ));
        }
        if self.min_heap_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "min_heap_size cannot exceed max_heap_size".into(),
            ));
        }
        if self.heap_hard_limit != 0 && self.heap_hard_limit < self.min_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "heap_hard_limit cannot be below min_heap_size".into(),
            ));
        }

        if self.heap_segment_size < 4 * MB {
            return Err(ConfigError::InvalidSegmentSize(
                "heap_segment_size must be at least 4 MiB".into(),
            ));
        }
        if self.heap_segment_size % MB != 0 {
            return Err(ConfigError::InvalidSegmentSize(
                "heap_segment_size must be 1-MiB aligned".into(),
            ));
        }

        if !self.card_size.is_power_of_two() {
            return Err(ConfigError::InvalidCardSize(
                "card_size must be a power of two".into(),
            ));
        }

        if self.allocation_quantum == 0 {
            return Err(ConfigError::InvalidAllocationQuantum(
                "allocation_quantum must be > 0".into(),
            ));
        }

        if self.large_object_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "large_object_threshold must be > 0".into(),
            ));
        }

        if let Some(threads) = self.gc_threads {
            if threads == 0 {
                return Err(ConfigError::InvalidGcThreads(
                    "gc_threads must be > 0".into(),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.min_productive_fraction) {
            return Err(ConfigError::InvalidThreshold(
                "min_productive_fraction must be between 0.0 and 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `GC_SERVER`, `GC_CONCURRENT`, `GC_NUMA_AWARE`,
    /// `GC_HEAP_HARD_LIMIT`, `GC_HEAP_SEGMENT_SIZE`, `GC_LATENCY_MODE`,
    /// `GC_LOH_COMPACTION_MODE`, `GC_GC_THREADS`, `GC_STRESS_HEAP`,
    /// `GC_VERBOSE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GC_SERVER") {
            config.server_gc = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("GC_CONCURRENT") {
            config.concurrent_gc = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("GC_NUMA_AWARE") {
            config.numa_aware = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("GC_HEAP_HARD_LIMIT") {
            if let Ok(size) = val.parse::<usize>() {
                config.heap_hard_limit = size;
            }
        }
        if let Ok(val) = std::env::var("GC_HEAP_SEGMENT_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.heap_segment_size = size;
            }
        }
        if let Ok(val) = std::env::var("GC_LATENCY_MODE") {
            if let Some(mode) = parse_latency_mode(&val) {
                config.latency_mode = mode;
            }
        }
        if let Ok(val) = std::env::var("GC_LOH_COMPACTION_MODE") {
            config.loh_compaction_mode = match val.as_str() {
                "0" | "never" => LohCompactionMode::Never,
                "1" | "once" => LohCompactionMode::Once,
                "2" | "always" => LohCompactionMode::Always,
                _ => config.loh_compaction_mode,
            };
        }
        if let Ok(val) = std::env::var("GC_GC_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                config.gc_threads = Some(threads);
            }
        }
        if let Ok(val) = std::env::var("GC_STRESS_HEAP") {
            config.stress_heap = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("GC_VERBOSE") {
            config.verbose = parse_bool(&val);
        }

        config
    }

    /// Rough estimate of GC CPU overhead as a percentage, used by
    /// diagnostics and the recommendation engine.
    pub fn estimated_overhead(&self) -> f32 {
        let thread_factor = 1.0 / (self.gc_threads.unwrap_or(1) as f32).sqrt();
        let concurrent_factor = if self.concurrent_gc { 0.7 } else { 1.0 };
        (10.0 * thread_factor * concurrent_factor).min(50.0)
    }
}

fn parse_bool(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

fn parse_latency_mode(val: &str) -> Option<LatencyMode> {
    Some(match val {
        "0" | "interactive" => LatencyMode::Interactive,
        "1" | "batch" => LatencyMode::Batch,
        "2" | "low-latency" => LatencyMode::LowLatency,
        "3" | "sustained-low-latency" => LatencyMode::SustainedLowLatency,
        "4" | "no-gc" => LatencyMode::NoGc,
        _ => return None,
    })
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("invalid segment size: {0}")]
    InvalidSegmentSize(String),

    #[error("invalid card size: {0}")]
    InvalidCardSize(String),

    #[error("invalid allocation quantum: {0}")]
    InvalidAllocationQuantum(String),

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid GC thread count: {0}")]
    InvalidGcThreads(String),
}

fn total_physical_memory() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|s| s.parse::<usize>().ok()) {
                        return kb * KB;
                    }
                }
            }
        }
    }
    8 * GB
}

fn default_max_heap(total_memory: usize) -> usize {
    let ratio = if total_memory < 4 * GB {
        0.5
    } else if total_memory < 16 * GB {
        0.4
    } else {
        0.3
    };
    ((total_memory as f64 * ratio) as usize).min(32 * GB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.concurrent_gc);
        assert_eq!(config.loh_compaction_mode, LohCompactionMode::Never);
    }

    #[test]
    fn rejects_undersized_segment() {
        let config = GcConfig {
            heap_segment_size: MB,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSegmentSize(_))
        ));
    }

    #[test]
    fn rejects_unaligned_segment() {
        let config = GcConfig {
            heap_segment_size: 4 * MB + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSegmentSize(_))
        ));
    }

    #[test]
    fn rejects_non_power_of_two_card_size() {
        let config = GcConfig {
            card_size: 500,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCardSize(_))));
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("GC_LOH_COMPACTION_MODE", "once");
        let config = GcConfig::from_env();
        assert_eq!(config.loh_compaction_mode, LohCompactionMode::Once);
        std::env::remove_var("GC_LOH_COMPACTION_MODE");
    }
}
