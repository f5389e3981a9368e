//! Host capability detection and concurrency policy.
//!
//! The host is probed once per process and classified into a [`HardwareTier`]. The
//! tier fixes the decode worker count, the token batch size and whether token
//! reading runs on its own task.

use std::fmt;
use std::process::Command;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Description of the primary accelerator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    pub name: String,
    /// Total device memory in GiB
    pub memory_gb: f64,
    /// Compute capability as `major.minor`, when the driver reports it
    pub compute_capability: Option<f32>,
}

/// Source of accelerator information
pub trait HardwareProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Describe the primary accelerator, or `None` when there is none
    fn probe(&self) -> Option<AcceleratorInfo>;
}

/// Queries `nvidia-smi` for the first visible GPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct NvidiaSmiProbe;

impl HardwareProbe for NvidiaSmiProbe {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn probe(&self) -> Option<AcceleratorInfo> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total,compute_cap",
                "--format=csv,noheader,nounits",
            ])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = %output.status, "nvidia-smi reported no usable GPU");
                None
            }
            Err(e) => {
                debug!(error = %e, "nvidia-smi not available");
                None
            }
        }
    }
}

/// Always reports a CPU-only host.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAcceleratorProbe;

impl HardwareProbe for NoAcceleratorProbe {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn probe(&self) -> Option<AcceleratorInfo> {
        None
    }
}

/// Reports a fixed accelerator. Used for pinned deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedProbe(pub Option<AcceleratorInfo>);

impl HardwareProbe for FixedProbe {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn probe(&self) -> Option<AcceleratorInfo> {
        self.0.clone()
    }
}

/// Parse the first line of `nvidia-smi --format=csv,noheader,nounits` output.
fn parse_nvidia_smi(output: &str) -> Option<AcceleratorInfo> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',').map(str::trim);

    let name = fields.next()?.to_string();
    let memory_mib: f64 = fields.next()?.parse().ok()?;
    let compute_capability = fields.next().and_then(|cc| cc.parse::<f32>().ok());

    Some(AcceleratorInfo {
        name,
        memory_gb: memory_mib / 1024.0,
        compute_capability,
    })
}

/// Probe selection from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Detect the accelerator with `nvidia-smi`
    #[default]
    Auto,
    /// Skip detection and use the CPU policy
    Cpu,
}

impl ProbeKind {
    pub fn probe(self) -> Box<dyn HardwareProbe> {
        match self {
            ProbeKind::Auto => Box::new(NvidiaSmiProbe),
            ProbeKind::Cpu => Box::new(NoAcceleratorProbe),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "gpu" | "nvidia" => Some(ProbeKind::Auto),
            "cpu" | "none" => Some(ProbeKind::Cpu),
            _ => None,
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// How the token stream is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// A dedicated reader task feeds the windower through a bounded channel
    Parallel,
    /// The windower polls the token stream inline
    Sequential,
}

/// Capability tier, carrying its policy values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareTier {
    HighEnd,
    Standard { worker_count: usize },
    Cpu,
}

impl HardwareTier {
    /// Classify an accelerator description. Deterministic for equal inputs.
    pub fn classify(accelerator: Option<&AcceleratorInfo>) -> Self {
        let Some(info) = accelerator else {
            return HardwareTier::Cpu;
        };

        let memory = info.memory_gb;
        let compute = info.compute_capability.unwrap_or(0.0);

        if memory >= 16.0 || compute >= 8.0 || (memory >= 12.0 && compute >= 7.0) {
            HardwareTier::HighEnd
        } else {
            let worker_count = ((memory / 4.0).floor() as usize).clamp(2, 3);
            HardwareTier::Standard { worker_count }
        }
    }

    pub fn worker_count(&self) -> usize {
        match self {
            HardwareTier::HighEnd => 4,
            HardwareTier::Standard { worker_count } => *worker_count,
            HardwareTier::Cpu => 2,
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            HardwareTier::HighEnd => 32,
            HardwareTier::Standard { .. } => 24,
            HardwareTier::Cpu => 16,
        }
    }

    pub fn io_mode(&self) -> IoMode {
        match self {
            HardwareTier::HighEnd | HardwareTier::Standard { .. } => IoMode::Parallel,
            HardwareTier::Cpu => IoMode::Sequential,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HardwareTier::HighEnd => "high_end",
            HardwareTier::Standard { .. } => "standard",
            HardwareTier::Cpu => "cpu",
        }
    }
}

impl fmt::Display for HardwareTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of host profiling
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareProfile {
    #[serde(serialize_with = "serialize_tier")]
    pub tier: HardwareTier,
    pub worker_count: usize,
    pub batch_size: usize,
    pub io_mode: IoMode,
    pub accelerator: Option<AcceleratorInfo>,
    pub host_cpus: usize,
}

impl HardwareProfile {
    pub fn from_accelerator(accelerator: Option<AcceleratorInfo>) -> Self {
        let tier = HardwareTier::classify(accelerator.as_ref());
        Self {
            tier,
            worker_count: tier.worker_count(),
            batch_size: tier.batch_size(),
            io_mode: tier.io_mode(),
            accelerator,
            host_cpus: num_cpus::get(),
        }
    }

    pub fn detect(probe: &dyn HardwareProbe) -> Self {
        let profile = Self::from_accelerator(probe.probe());
        info!(
            probe = probe.name(),
            tier = %profile.tier,
            workers = profile.worker_count,
            batch_size = profile.batch_size,
            accelerator = profile.accelerator.as_ref().map(|a| a.name.as_str()).unwrap_or("none"),
            "Hardware profiled"
        );
        profile
    }

    /// CPU policy without probing
    pub fn cpu() -> Self {
        Self::from_accelerator(None)
    }
}

fn serialize_tier<S: serde::Serializer>(tier: &HardwareTier, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(tier.as_str())
}

static HARDWARE_PROFILE: OnceLock<HardwareProfile> = OnceLock::new();

/// Profile the host with `probe` unless a profile already exists.
///
/// The first caller wins; later probes are ignored.
pub fn init_hardware_profile(probe: &dyn HardwareProbe) -> &'static HardwareProfile {
    HARDWARE_PROFILE.get_or_init(|| HardwareProfile::detect(probe))
}

/// Process-wide profile, detected with `nvidia-smi` on first use
pub fn hardware_profile() -> &'static HardwareProfile {
    HARDWARE_PROFILE.get_or_init(|| HardwareProfile::detect(&NvidiaSmiProbe))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(memory_gb: f64, compute: f32) -> AcceleratorInfo {
        AcceleratorInfo {
            name: "test-gpu".to_string(),
            memory_gb,
            compute_capability: Some(compute),
        }
    }

    #[test]
    fn test_scenario_high_end_gpu() {
        let profile = HardwareProfile::from_accelerator(Some(gpu(24.0, 8.6)));
        assert_eq!(profile.tier, HardwareTier::HighEnd);
        assert_eq!(profile.worker_count, 4);
        assert_eq!(profile.batch_size, 32);
        assert_eq!(profile.io_mode, IoMode::Parallel);
    }

    #[test]
    fn test_high_end_rules() {
        assert_eq!(HardwareTier::classify(Some(&gpu(16.0, 6.1))), HardwareTier::HighEnd);
        assert_eq!(HardwareTier::classify(Some(&gpu(8.0, 8.0))), HardwareTier::HighEnd);
        assert_eq!(HardwareTier::classify(Some(&gpu(12.0, 7.0))), HardwareTier::HighEnd);
        assert_ne!(HardwareTier::classify(Some(&gpu(11.9, 7.5))), HardwareTier::HighEnd);
    }

    #[test]
    fn test_standard_worker_count() {
        assert_eq!(
            HardwareTier::classify(Some(&gpu(6.0, 6.1))),
            HardwareTier::Standard { worker_count: 2 }
        );
        assert_eq!(
            HardwareTier::classify(Some(&gpu(12.0, 6.1))),
            HardwareTier::Standard { worker_count: 3 }
        );
        let tier = HardwareTier::classify(Some(&gpu(4.0, 7.5)));
        assert_eq!(tier.worker_count(), 2);
        assert_eq!(tier.batch_size(), 24);
        assert_eq!(tier.io_mode(), IoMode::Parallel);
    }

    #[test]
    fn test_cpu_policy() {
        let profile = HardwareProfile::detect(&NoAcceleratorProbe);
        assert_eq!(profile.tier, HardwareTier::Cpu);
        assert_eq!(profile.worker_count, 2);
        assert_eq!(profile.batch_size, 16);
        assert_eq!(profile.io_mode, IoMode::Sequential);
        assert!(profile.host_cpus >= 1);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let info = gpu(10.0, 7.5);
        let first = HardwareProfile::from_accelerator(Some(info.clone()));
        let second = HardwareProfile::from_accelerator(Some(info));
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let info = parse_nvidia_smi("NVIDIA GeForce RTX 3090, 24576, 8.6\nNVIDIA T4, 15360, 7.5\n")
            .unwrap();
        assert_eq!(info.name, "NVIDIA GeForce RTX 3090");
        assert_eq!(info.memory_gb, 24.0);
        assert_eq!(info.compute_capability, Some(8.6));

        let no_cc = parse_nvidia_smi("Tesla K80, 11441, [N/A]").unwrap();
        assert_eq!(no_cc.compute_capability, None);
        assert!(parse_nvidia_smi("").is_none());
    }

    #[test]
    fn test_probe_kind_parse() {
        assert_eq!(ProbeKind::parse("AUTO"), Some(ProbeKind::Auto));
        assert_eq!(ProbeKind::parse("cpu"), Some(ProbeKind::Cpu));
        assert_eq!(ProbeKind::parse("tpu"), None);
    }

    #[test]
    fn test_memoized_profile() {
        let first = init_hardware_profile(&NoAcceleratorProbe) as *const HardwareProfile;
        let second = init_hardware_profile(&FixedProbe(Some(gpu(80.0, 9.0)))) as *const _;
        assert_eq!(first, second);
        assert!(std::ptr::eq(hardware_profile(), first));
    }
}
