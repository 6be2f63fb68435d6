//! The small slice of mode selection left in scope for a binary to actually
//! run: where the Management HTTP API binds, where the Output Store
//! persists to, and how verbose logging should be. Flag parsing for
//! transport selection (stdio vs. HTTP vs. SSE) and the tool dispatcher
//! itself remain out of scope and live in a collaborator this crate
//! doesn't implement.

use clap::Parser;

/// Build version string combining the Cargo package version and git describe.
fn build_version() -> &'static str {
    static VERSION: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION.get_or_init(|| {
        let cargo_ver = env!("CARGO_PKG_VERSION");
        let git_desc = env!("PROCSUP_GIT_DESCRIBE");
        if git_desc.is_empty() {
            cargo_ver.to_string()
        } else {
            format!("{cargo_ver} ({git_desc})")
        }
    })
}

#[derive(Parser, Debug)]
#[command(name = "procsup", version = build_version(), about = "Process-supervision service")]
pub struct Cli {
    /// Address the Management HTTP API binds to.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Port the Management HTTP API listens on.
    #[arg(long, default_value_t = 4620)]
    pub port: u16,

    /// Overrides OUTPUT_STORAGE_PATH; if neither is set, output is kept in
    /// a process-lifetime temp directory removed on shutdown.
    #[arg(long)]
    pub storage_path: Option<String>,

    /// Increases logging verbosity; never changes how the HTTP server
    /// binds (axum has no separate "dev server" mode to fall back to).
    #[arg(long)]
    pub debug: bool,
}
