use std::path::PathBuf;

use tracing::debug;

use crate::collaborators::ResourceSampler;

/// Memory usage from `/proc/meminfo`: `1 - MemAvailable / MemTotal`.
#[derive(Debug, Clone)]
pub struct ProcResourceSampler {
    meminfo: PathBuf,
}

impl Default for ProcResourceSampler {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

impl ProcResourceSampler {
    pub fn new(meminfo: impl Into<PathBuf>) -> Self {
        Self { meminfo: meminfo.into() }
    }
}

impl ResourceSampler for ProcResourceSampler {
    fn memory_usage_ratio(&self) -> Option<f64> {
        match std::fs::read_to_string(&self.meminfo) {
            Ok(contents) => parse_meminfo(&contents),
            Err(e) => {
                debug!(path = %self.meminfo.display(), "Memory usage unavailable: {}", e);
                None
            }
        }
    }
}

/// Parses `MemTotal` and `MemAvailable` (kB) and returns the used fraction.
pub fn parse_meminfo(contents: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        contents
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|value| value.parse::<f64>().ok())
    };

    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - available / total).clamp(0.0, 1.0))
}
