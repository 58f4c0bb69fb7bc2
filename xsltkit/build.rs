//! Build script to capture git information and dependency versions at compile time

use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Libraries listed by `--version`, in display order
const CORE_LIBRARIES: &[&str] = &["xot", "xee-xpath", "tree-sitter", "tree-sitter-html"];
/// Additional libraries listed by `--version --verbose`
const RUNTIME_LIBRARIES: &[&str] = &["rayon", "crossbeam-channel", "quick-xml"];

fn main() {
    // Re-run build script if git HEAD changes or Cargo.lock changes
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");
    println!("cargo:rerun-if-changed=../Cargo.lock");

    let commit_hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let commit_date = git(&["log", "-1", "--format=%ci"]).unwrap_or_else(|| "unknown".to_string());

    // Check if working directory is dirty
    let is_dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);
    let dirty_suffix = if is_dirty { "-dirty" } else { "" };

    println!("cargo:rustc-env=XSLTKIT_GIT_HASH={}{}", commit_hash, dirty_suffix);
    println!("cargo:rustc-env=XSLTKIT_GIT_DATE={}", commit_date);

    let versions = std::fs::read_to_string("../Cargo.lock")
        .map(|lockfile| parse_cargo_lock(&lockfile))
        .unwrap_or_default();

    let out_dir = env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("versions.rs");
    let mut f = File::create(&dest_path).unwrap();

    write_table(&mut f, "DEPENDENCY_VERSIONS", "Markup and XPath libraries", CORE_LIBRARIES, &versions);
    writeln!(f).unwrap();
    write_table(&mut f, "RUNTIME_VERSIONS", "Concurrency and escaping libraries", RUNTIME_LIBRARIES, &versions);
}

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn write_table(
    f: &mut File,
    name: &str,
    doc: &str,
    crates: &[&str],
    versions: &HashMap<String, PackageInfo>,
) {
    writeln!(f, "/// Auto-generated from Cargo.lock: {}", doc).unwrap();
    writeln!(f, "pub const {}: &[(&str, &str)] = &[", name).unwrap();
    for crate_name in crates {
        if let Some(info) = versions.get(*crate_name) {
            writeln!(f, "    (\"{}\", \"{}\"),", crate_name, info.display_version()).unwrap();
        }
    }
    writeln!(f, "];").unwrap();
}

/// Package version info with source detection
struct PackageInfo {
    version: String,
    source_type: &'static str, // "registry", "git", "path"
}

impl PackageInfo {
    fn display_version(&self) -> String {
        match self.source_type {
            "registry" => self.version.clone(),
            other => format!("{} ({})", self.version, other),
        }
    }
}

/// Parse Cargo.lock to extract package versions
fn parse_cargo_lock(content: &str) -> HashMap<String, PackageInfo> {
    let mut versions = HashMap::new();
    let mut current_name: Option<String> = None;
    let mut current_version: Option<String> = None;
    let mut current_source: Option<String> = None;

    let mut finish = |name: Option<String>, version: Option<String>, source: Option<String>| {
        if let (Some(name), Some(version)) = (name, version) {
            if should_track(&name) {
                let source_type = match source.as_deref() {
                    None => "path",
                    Some(s) if s.starts_with("git+") => "git",
                    Some(_) => "registry",
                };
                versions.insert(name, PackageInfo { version, source_type });
            }
        }
    };

    for line in content.lines() {
        let line = line.trim();
        if line == "[[package]]" {
            finish(current_name.take(), current_version.take(), current_source.take());
        } else if let Some(value) = line.strip_prefix("name = ") {
            current_name = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("version = ") {
            current_version = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("source = ") {
            current_source = Some(value.trim_matches('"').to_string());
        }
    }
    // Don't forget the last package
    finish(current_name, current_version, current_source);

    versions
}

/// Check if we should track this package
fn should_track(name: &str) -> bool {
    CORE_LIBRARIES.contains(&name) || RUNTIME_LIBRARIES.contains(&name)
}
