//! Weighted step progress.
//!
//! 100% is never produced here; only the success transition sets it.

/// One step of the build script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStep {
    pub name: &'static str,
    pub weight: u32,
}

/// Steps emitted by the build script as `[STEP n]`, in order.
pub const BUILD_STEPS: [BuildStep; 10] = [
    BuildStep { name: "Kill zombies", weight: 2 },
    BuildStep { name: "Stop PM2", weight: 5 },
    BuildStep { name: "Stop Redis", weight: 2 },
    BuildStep { name: "Check memory", weight: 1 },
    BuildStep { name: "Install deps", weight: 10 },
    BuildStep { name: "Build app", weight: 60 },
    BuildStep { name: "Verify build", weight: 3 },
    BuildStep { name: "Start Redis", weight: 2 },
    BuildStep { name: "Restart PM2", weight: 12 },
    BuildStep { name: "Switch Nginx", weight: 3 },
];

/// Highest value the estimator reports.
pub const MAX_ESTIMATED_PROGRESS: f64 = 99.0;

pub fn total_weight() -> u32 {
    BUILD_STEPS.iter().map(|s| s.weight).sum()
}

/// Percentage done when `current_step` is running (or finished, if
/// `step_complete`). Steps past the end of the table count as complete.
pub fn calculate_progress(current_step: u32, step_complete: bool) -> f64 {
    let completed: u32 = BUILD_STEPS
        .iter()
        .zip(0u32..)
        .filter(|(_, idx)| *idx < current_step || (*idx == current_step && step_complete))
        .map(|(step, _)| step.weight)
        .sum();

    let percent = f64::from(completed) / f64::from(total_weight()) * 100.0;
    percent.min(MAX_ESTIMATED_PROGRESS)
}

/// Round to one decimal, as shown in the dashboard.
pub fn round_progress(progress: f64) -> f64 {
    (progress * 10.0).round() / 10.0
}
