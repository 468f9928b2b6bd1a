//! Built-in measurement sources.
//!
//! | name       | mechanism                                   |
//! |------------|---------------------------------------------|
//! | `procstat` | `/proc/<pid>/stat` and `/proc/<pid>/status` |
//! | `sysstat`  | `/proc/loadavg`, `/proc/meminfo`, `/proc/stat` |
//! | `top`      | `top -b -p <pid>` output                    |
//! | `nethogs`  | `nethogs -t` trace output                   |
//! | `iperf3`   | repeated `iperf3 -J` client runs            |

pub mod iperf3;
pub mod nethogs;
pub mod procstat;
pub mod sysstat;
pub mod tool;
pub mod top;

use crate::module::{ModuleEntry, ModuleRegistry};

/// Registry holding every built-in source.
pub fn builtin_registry() -> ModuleRegistry {
    let entries = [
        ModuleEntry {
            name: procstat::NAME,
            summary: procstat::SUMMARY,
            help: procstat::HELP,
            factory: procstat::create,
        },
        ModuleEntry {
            name: sysstat::NAME,
            summary: sysstat::SUMMARY,
            help: sysstat::HELP,
            factory: sysstat::create,
        },
        ModuleEntry {
            name: top::NAME,
            summary: top::SUMMARY,
            help: top::HELP,
            factory: top::create,
        },
        ModuleEntry {
            name: nethogs::NAME,
            summary: nethogs::SUMMARY,
            help: nethogs::HELP,
            factory: nethogs::create,
        },
        ModuleEntry {
            name: iperf3::NAME,
            summary: iperf3::SUMMARY,
            help: iperf3::HELP,
            factory: iperf3::create,
        },
    ];

    let mut registry = ModuleRegistry::new();
    for entry in entries {
        // Names above are distinct constants.
        let _ = registry.register(entry);
    }
    registry
}
