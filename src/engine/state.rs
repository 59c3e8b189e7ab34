// Phases of one installer run, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallPhase {
    Idle,
    PreparingRoot,
    Diagnostics,
    Provisioning,
    Dependencies,
    Icon,
    Launcher,
    Build,
    Verification,
    Report,
    Done,
}

impl InstallPhase {
    pub fn label(self) -> &'static str {
        match self {
            InstallPhase::Idle => "Idle",
            InstallPhase::PreparingRoot => "Create installation folder",
            InstallPhase::Diagnostics => "System diagnostics",
            InstallPhase::Provisioning => "Provision files",
            InstallPhase::Dependencies => "Install dependencies",
            InstallPhase::Icon => "Convert icon",
            InstallPhase::Launcher => "Create launcher",
            InstallPhase::Build => "Build installer",
            InstallPhase::Verification => "Verify installation",
            InstallPhase::Report => "Write audit report",
            InstallPhase::Done => "Done",
        }
    }
}
