// src/utils/system.rs: System functions

use anyhow::{anyhow, Result};
use log::{debug, warn};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use crate::config::defs::MemoryLimit;


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<(u64, u64)> total ram, available ram, in bytes
pub fn detect_ram() -> Result<(u64, u64)> {
    let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_memory_specifics(MemoryRefreshKind::everything());

    let total_ram = system.total_memory();
    let available_ram = if cfg!(target_os = "macos") {
        total_ram.saturating_sub(system.used_memory())
    } else {
        system.available_memory()
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Warns when the JVM heap limit is larger than the memory the host can offer.
///
/// # Arguments
///
/// * `limit` - The `-m` value of the run.
///
/// # Returns
/// true when the limit fits in available RAM or RAM can't be measured.
pub fn check_memory_limit(limit: &MemoryLimit) -> bool {
    match detect_ram() {
        Ok((total, available)) => {
            debug!(
                "RAM: {} MiB total, {} MiB available, JVM limit {}",
                total >> 20,
                available >> 20,
                limit.as_str()
            );
            if limit.bytes() > available {
                warn!(
                    "Memory limit {} exceeds available RAM ({} MiB); the Java tools may fail",
                    limit.as_str(),
                    available >> 20
                );
                return false;
            }
            true
        }
        Err(e) => {
            warn!("{}", e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_limit_fits() {
        let limit = MemoryLimit::parse("1M").unwrap();
        assert!(check_memory_limit(&limit));
    }

    #[test]
    fn test_huge_limit_reported() {
        let limit = MemoryLimit::parse("1000000G").unwrap();
        if detect_ram().is_ok() {
            assert!(!check_memory_limit(&limit));
        }
    }
}
