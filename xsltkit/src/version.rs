//! Version information display

// Include the auto-generated versions from build.rs
include!(concat!(env!("OUT_DIR"), "/versions.rs"));

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (set by build.rs)
pub const GIT_HASH: &str = env!("XSLTKIT_GIT_HASH");

/// Git commit date (set by build.rs)
pub const GIT_DATE: &str = env!("XSLTKIT_GIT_DATE");

fn print_table(title: &str, rows: &[(&str, &str)]) {
    println!("{}:", title);

    // Find max name length for alignment
    let max_len = rows.iter().map(|(n, _)| n.len()).max().unwrap_or(0);

    for (name, version) in rows {
        println!("  {:width$}  {}", name, version, width = max_len);
    }
}

/// Print basic version information
pub fn print_version() {
    println!("xsltkit {} ({} {})", VERSION, GIT_HASH, GIT_DATE);
    println!();
    print_table("Core libraries", DEPENDENCY_VERSIONS);
}

/// Print verbose version information including the runtime stack and pool
pub fn print_version_verbose() {
    print_version();
    println!();
    print_table("Runtime libraries", RUNTIME_VERSIONS);

    let config = xsltkit_core::Config::from_env();
    println!();
    println!("Worker pool:");
    println!("  threads     {}", config.threads);
    println!("  stack size  {} KiB", config.stack_size / 1024);
}
