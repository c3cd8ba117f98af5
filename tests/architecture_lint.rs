//! Architecture enforcement lint - ensures the zone table and config
//! snapshot each have a single owner.
//!
//! The zone registry is the single source of truth for zone state; nothing
//! outside `src/zone/mod.rs` should construct a `Zone` directly or reach
//! into its internals. Likewise the admin config snapshot is exclusively
//! owned by `src/config/mod.rs`.
//!
//! This test parses the crate's source tree and flags violations of those
//! ownership boundaries by simple substring search.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// (pattern, explanation, file allowed to contain it)
const OWNERSHIP_PATTERNS: &[(&str, &str, &str)] = &[
    (
        "Zone {",
        "Zone is constructed exclusively by ZoneRegistry::build_zone; other modules must go through ZoneRegistry's public API",
        "zone/mod.rs",
    ),
    (
        "AdminConfig {",
        "AdminConfig is owned exclusively by ConfigOrchestrator; other modules must go through its accessor methods",
        "config/mod.rs",
    ),
];

/// Files allowed to construct the above regardless of directory (test
/// helpers building fixtures are exempt).
fn is_exempt(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == "tests")
        || path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with("admin_config.rs"))
            .unwrap_or(false)
}

#[test]
fn zone_table_and_config_snapshot_have_a_single_owner() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

    let mut violations = Vec::new();

    for entry in WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|s| s == "rs").unwrap_or(false))
    {
        let path = entry.path();
        if is_exempt(path) {
            continue;
        }
        let content = fs::read_to_string(path).expect("failed to read source file");
        let relative = path.strip_prefix(&src_dir).unwrap_or(path);

        for (pattern, explanation, owner_file) in OWNERSHIP_PATTERNS {
            if relative.to_string_lossy() == *owner_file {
                continue;
            }
            for (line_idx, line) in content.lines().enumerate() {
                // `AdminConfig::default()` and `AdminConfig::clone()` are fine;
                // only the struct-literal form is disallowed.
                if line.contains(pattern) {
                    violations.push((relative.display().to_string(), line_idx + 1, explanation.to_string()));
                }
            }
        }
    }

    assert!(
        violations.is_empty(),
        "\n\nownership boundary violated:\n\n{}",
        violations
            .iter()
            .map(|(file, line, why)| format!("  {file}:{line}\n    {why}\n"))
            .collect::<Vec<_>>()
            .join("\n")
    );
}
