//! Deterministic port allocation.
//!
//! Each branch hashes to a fixed offset inside `[base, base + span)`:
//! the first four bytes of SHA-256 over the UTF-8 branch name, read
//! big-endian, modulo `span`. From there candidates are probed upwards until
//! one is neither recorded by another environment nor bound on `127.0.0.1`.
//! The result is advisory; nothing holds the port after the probe.

use crate::config::PortsConfig;
use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::PortProbe;
use crate::types::Environment;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// SHA-256 of the branch name, first 4 bytes big-endian, mod `span`.
/// Changing this moves every existing environment to a new port.
pub fn branch_offset(branch: &str, span: u16) -> u32 {
    let digest = Sha256::digest(branch.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % u32::from(span.max(1))
}

/// Ports recorded by any known environment.
pub fn claimed_ports(environments: &[Environment]) -> BTreeSet<u16> {
    environments.iter().filter_map(|env| env.port).collect()
}

pub struct PortAllocator<'a> {
    probe: &'a dyn PortProbe,
    span: u16,
    max_probes: u32,
}

impl<'a> PortAllocator<'a> {
    pub fn new(probe: &'a dyn PortProbe, cfg: &PortsConfig) -> Self {
        Self {
            probe,
            span: cfg.span,
            max_probes: cfg.max_probes,
        }
    }

    pub fn allocate(
        &self,
        base: u16,
        branch: &str,
        known: &[Environment],
    ) -> Result<u16, DuxError> {
        self.allocate_avoiding(base, branch, &claimed_ports(known))
    }

    pub fn allocate_avoiding(
        &self,
        base: u16,
        branch: &str,
        claimed: &BTreeSet<u16>,
    ) -> Result<u16, DuxError> {
        let start = u32::from(base) + branch_offset(branch, self.span);
        for i in 0..self.max_probes {
            let candidate = start + i;
            let Ok(port) = u16::try_from(candidate) else {
                break;
            };
            if claimed.contains(&port) {
                continue;
            }
            if self.probe.is_free(port) {
                append_run_log(
                    "info",
                    "port.allocated",
                    json!({
                        "branch": branch,
                        "base": base,
                        "start": start,
                        "port": port,
                        "skipped": i
                    }),
                );
                return Ok(port);
            }
        }
        append_run_log(
            "error",
            "port.exhausted",
            json!({
                "branch": branch,
                "start": start,
                "max_probes": self.max_probes
            }),
        );
        Err(DuxError::PortExhausted {
            start,
            probes: self.max_probes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{branch_offset, claimed_ports, PortAllocator};
    use crate::config::PortsConfig;
    use crate::errors::DuxError;
    use crate::runtime::FakePortProbe;
    use crate::types::{Cleanliness, Environment, Presence};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn env_with_port(branch: &str, port: u16) -> Environment {
        Environment {
            branch: Some(branch.to_string()),
            path: PathBuf::from(format!("/repo/.wt/{branch}")),
            port: Some(port),
            source: None,
            cleanliness: Cleanliness::Clean,
            presence: Presence::Complete,
            primary: false,
        }
    }

    #[test]
    fn offset_is_sha256_prefix_modulo_span() {
        // sha256("issue/1-test-issue") starts with fd28c775 = 4247308149.
        assert_eq!(branch_offset("issue/1-test-issue", 1000), 149);
        assert_eq!(branch_offset("work/add-dark-mode-toggle", 1000), 467);
        assert_eq!(branch_offset("issue/1-test-issue", 1), 0);
    }

    #[test]
    fn allocation_is_deterministic_without_competition() {
        let probe = FakePortProbe::default();
        let cfg = PortsConfig::default();
        let allocator = PortAllocator::new(&probe, &cfg);
        let first = allocator.allocate(3000, "issue/1-test-issue", &[]).expect("first");
        let second = allocator.allocate(3000, "issue/1-test-issue", &[]).expect("second");
        assert_eq!(first, 3149);
        assert_eq!(first, second);
    }

    #[test]
    fn bound_offset_port_moves_to_next() {
        let probe = FakePortProbe::with_bound([3149]);
        let cfg = PortsConfig::default();
        let port = PortAllocator::new(&probe, &cfg)
            .allocate(3000, "issue/1-test-issue", &[])
            .expect("allocated");
        assert_eq!(port, 3150);
        assert_eq!(probe.probed(), vec![3149, 3150]);
    }

    #[test]
    fn ports_recorded_by_other_environments_are_skipped_without_probing() {
        let probe = FakePortProbe::default();
        let cfg = PortsConfig::default();
        let known = vec![
            env_with_port("issue/9-other", 3149),
            env_with_port("work/spike", 3150),
        ];
        let port = PortAllocator::new(&probe, &cfg)
            .allocate(3000, "issue/1-test-issue", &known)
            .expect("allocated");
        assert_eq!(port, 3151);
        assert_eq!(probe.probed(), vec![3151]);
        assert_eq!(claimed_ports(&known), BTreeSet::from([3149, 3150]));
    }

    #[test]
    fn exhausted_budget_is_reported() {
        let probe = FakePortProbe::with_bound(3149..3155);
        let cfg = PortsConfig {
            base: Some(3000),
            span: 1000,
            max_probes: 6,
        };
        let err = PortAllocator::new(&probe, &cfg)
            .allocate(3000, "issue/1-test-issue", &[])
            .expect_err("exhausted");
        assert!(matches!(
            err,
            DuxError::PortExhausted {
                start: 3149,
                probes: 6
            }
        ));
    }

    #[test]
    fn candidates_stop_at_the_top_of_the_port_range() {
        let probe = FakePortProbe::with_bound(65000..=65535);
        let cfg = PortsConfig::default();
        let err = PortAllocator::new(&probe, &cfg)
            .allocate(65000, "issue/1-test-issue", &[])
            .expect_err("no wrap");
        assert!(matches!(err, DuxError::PortExhausted { .. }));
        assert_eq!(probe.probed().last().copied(), Some(65535));
    }
}
