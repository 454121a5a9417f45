//! Build mode to script and environment mapping.
//!
//! The build script reads its options from environment variables. This table
//! mirrors what the script expects for each dashboard preset.

use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::models::{BuildId, BuildMode, BuildRequest};

/// Script name and environment for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub script: &'static str,
    pub vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.vars.into_iter().collect()
    }
}

/// Package script run for a build mode.
pub const fn build_script(mode: BuildMode) -> &'static str {
    match mode {
        BuildMode::Quick => "build:quick",
        BuildMode::Full | BuildMode::RamOptimized => "build:server",
        BuildMode::Phased => "build:phased",
        BuildMode::PhasedProd => "build:phased:prod",
        BuildMode::Clean => "build:clean",
    }
}

/// Half the CPU cores, between 2 and 16.
pub fn optimal_workers() -> u32 {
    let cores = u32::try_from(num_cpus::get()).unwrap_or(4);
    (cores / 2).clamp(2, 16)
}

/// Requested worker count, or the CPU-based default when unset or zero.
pub fn resolve_workers(request: &BuildRequest) -> u32 {
    request
        .workers
        .filter(|w| *w > 0)
        .unwrap_or_else(optimal_workers)
}

fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// Environment variables for the build script.
pub fn build_environment(build_id: BuildId, request: &BuildRequest, workers: u32) -> BuildEnvironment {
    let mode = request.build_mode;
    let mut vars = BTreeMap::new();
    let mut set = |key: &str, value: &str| {
        vars.insert(key.to_string(), value.to_string());
    };

    set("BUILD_ID", &build_id.to_string());

    match mode {
        BuildMode::Quick => {
            set("BUILD_MODE", "quick");
            set("SKIP_DEPS", "true");
            set("SKIP_PM2", "true");
            set("SKIP_REDIS", "true");
        }
        BuildMode::Clean => {
            set("BUILD_MODE", "full");
            set("FORCE_CLEAN", "true");
        }
        BuildMode::Phased => {
            set("BUILD_MODE", "phased");
        }
        BuildMode::PhasedProd => {
            set("BUILD_MODE", "phased");
            set("SKIP_DEPS", "false");
            set("TEST_DATABASE", "true");
            set("TEST_REDIS", "true");
        }
        BuildMode::Full | BuildMode::RamOptimized => {
            set("BUILD_MODE", "full");
        }
    }

    vars.entry("SKIP_DEPS".to_string())
        .or_insert_with(|| flag(request.skip_deps));
    // The script clears `.next` when FORCE_CLEAN=true; the request flag maps inverted.
    vars.entry("FORCE_CLEAN".to_string())
        .or_insert_with(|| flag(!request.force_clean));

    vars.insert("QUICK_BUILD".to_string(), flag(mode == BuildMode::Quick));
    vars.insert("FORCE_FULL_BUILD".to_string(), flag(mode == BuildMode::Full));

    if let Some(size) = request.max_old_space_size.filter(|s| *s > 0) {
        vars.insert("MAX_OLD_SPACE".to_string(), size.to_string());
    }
    if workers > 0 {
        vars.insert("BUILD_WORKERS".to_string(), workers.to_string());
    }

    BuildEnvironment {
        script: build_script(mode),
        vars,
    }
}

/// Header written to the log before the build script starts.
pub fn log_header(
    build_id: BuildId,
    request: &BuildRequest,
    env: &BuildEnvironment,
    command: &str,
    working_dir: &Path,
) -> String {
    let value = |key: &str, default: &'static str| env.get(key).unwrap_or(default).to_string();
    let lines = [
        "[BUILD] BuildMaster Build Started".to_string(),
        format!("[INFO] Build ID: {build_id}"),
        format!("[INFO] Build Script: {command} {}", env.script),
        format!("[INFO] Mode: {}", request.build_mode),
        format!("[INFO] Working Directory: {}", working_dir.display()),
        format!("[INFO] Skip Deps: {}", value("SKIP_DEPS", "false")),
        format!("[INFO] Force Clean: {}", value("FORCE_CLEAN", "false")),
        format!("[INFO] Test Database: {}", value("TEST_DATABASE", "false")),
        format!("[INFO] Test Redis: {}", value("TEST_REDIS", "false")),
        format!("[INFO] Max Old Space: {}", value("MAX_OLD_SPACE", "auto")),
        format!("[INFO] Workers: {}", value("BUILD_WORKERS", "auto")),
        "[BUILD] ================================".to_string(),
    ];
    let mut header = lines.join("\n");
    header.push_str("\n\n");
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_for(mode: BuildMode) -> BuildEnvironment {
        build_environment(BuildId::new(), &BuildRequest::with_mode(mode), 4)
    }

    #[test]
    fn test_quick_mode_flags() {
        let env = env_for(BuildMode::Quick);
        assert_eq!(env.script, "build:quick");
        assert_eq!(env.get("BUILD_MODE"), Some("quick"));
        assert_eq!(env.get("SKIP_DEPS"), Some("true"));
        assert_eq!(env.get("SKIP_PM2"), Some("true"));
        assert_eq!(env.get("SKIP_REDIS"), Some("true"));
        assert_eq!(env.get("QUICK_BUILD"), Some("true"));
        assert_eq!(env.get("FORCE_FULL_BUILD"), Some("false"));
    }

    #[test]
    fn test_clean_mode_forces_clean() {
        let mut request = BuildRequest::with_mode(BuildMode::Clean);
        request.force_clean = true;
        let env = build_environment(BuildId::new(), &request, 4);
        assert_eq!(env.script, "build:clean");
        assert_eq!(env.get("BUILD_MODE"), Some("full"));
        assert_eq!(env.get("FORCE_CLEAN"), Some("true"));
        assert_eq!(env.get("FORCE_FULL_BUILD"), Some("false"));
    }

    #[test]
    fn test_phased_prod_tests_services() {
        let mut request = BuildRequest::with_mode(BuildMode::PhasedProd);
        request.skip_deps = true;
        let env = build_environment(BuildId::new(), &request, 4);
        assert_eq!(env.script, "build:phased:prod");
        assert_eq!(env.get("BUILD_MODE"), Some("phased"));
        // The preset wins over the request flag
        assert_eq!(env.get("SKIP_DEPS"), Some("false"));
        assert_eq!(env.get("TEST_DATABASE"), Some("true"));
        assert_eq!(env.get("TEST_REDIS"), Some("true"));
        assert_eq!(env.get("SKIP_PM2"), None);
    }

    #[test]
    fn test_full_and_ram_optimized_share_script() {
        let full = env_for(BuildMode::Full);
        let ram = env_for(BuildMode::RamOptimized);
        assert_eq!(full.script, "build:server");
        assert_eq!(ram.script, "build:server");
        assert_eq!(full.get("FORCE_FULL_BUILD"), Some("true"));
        assert_eq!(ram.get("FORCE_FULL_BUILD"), Some("false"));
        assert_eq!(ram.get("BUILD_MODE"), Some("full"));
    }

    #[test]
    fn test_request_flags_fill_unset_vars() {
        let mut request = BuildRequest::with_mode(BuildMode::Phased);
        request.skip_deps = true;
        request.force_clean = true;
        let env = build_environment(BuildId::new(), &request, 4);
        assert_eq!(env.get("SKIP_DEPS"), Some("true"));
        assert_eq!(env.get("FORCE_CLEAN"), Some("false"));

        let env = env_for(BuildMode::Phased);
        assert_eq!(env.get("SKIP_DEPS"), Some("false"));
        assert_eq!(env.get("FORCE_CLEAN"), Some("true"));
    }

    #[test]
    fn test_memory_and_workers() {
        let mut request = BuildRequest::with_mode(BuildMode::Full);
        request.max_old_space_size = Some(8192);
        let env = build_environment(BuildId::new(), &request, 6);
        assert_eq!(env.get("MAX_OLD_SPACE"), Some("8192"));
        assert_eq!(env.get("BUILD_WORKERS"), Some("6"));

        request.max_old_space_size = Some(0);
        let env = build_environment(BuildId::new(), &request, 0);
        assert_eq!(env.get("MAX_OLD_SPACE"), None);
        assert_eq!(env.get("BUILD_WORKERS"), None);
    }

    #[test]
    fn test_build_id_is_exported() {
        let id = BuildId::new();
        let env = build_environment(id, &BuildRequest::default(), 2);
        assert_eq!(env.get("BUILD_ID"), Some(id.to_string().as_str()));
    }

    #[test]
    fn test_resolve_workers() {
        let mut request = BuildRequest::default();
        request.workers = Some(3);
        assert_eq!(resolve_workers(&request), 3);

        request.workers = Some(0);
        let auto = resolve_workers(&request);
        assert!((2..=16).contains(&auto));
    }

    #[test]
    fn test_log_header_lines() {
        let id = BuildId::new();
        let request = BuildRequest::with_mode(BuildMode::Quick);
        let env = build_environment(id, &request, 4);
        let header = log_header(id, &request, &env, "pnpm run", Path::new("/srv/app"));
        assert!(header.starts_with("[BUILD] BuildMaster Build Started\n"));
        assert!(header.contains("[INFO] Build Script: pnpm run build:quick"));
        assert!(header.contains("[INFO] Test Database: false"));
        assert!(header.contains("[INFO] Max Old Space: auto"));
        assert!(header.contains("[INFO] Workers: 4"));
        assert!(header.ends_with("================================\n\n"));
    }
}
