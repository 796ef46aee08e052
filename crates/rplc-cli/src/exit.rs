//! Exit codes, spec.md §6: "0 success; 1 argument or configuration
//! error; 2 runtime error during job execution; 3 partial success (some
//! requests failed but job reported SUCCESS with degraded data)."

use rplc_job::ExtendedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    ArgumentOrConfig,
    Runtime,
    PartialSuccess,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        let raw: u8 = match code {
            ExitCode::Success => 0,
            ExitCode::ArgumentOrConfig => 1,
            ExitCode::Runtime => 2,
            ExitCode::PartialSuccess => 3,
        };
        std::process::ExitCode::from(raw)
    }
}

/// Translates a finished Job's extended state to an exit code (spec.md
/// §7's "CLIs translate SUCCESS to exit 0, any FINISHED/* other than
/// SUCCESS to non-zero per §6"). `CONFIG_ERROR` maps to 1, everything
/// else non-successful maps to 2; this crate's jobs don't currently
/// surface a distinct "succeeded with degraded data" signal, so exit code
/// 3 is never produced here (see DESIGN.md).
pub fn from_extended_state(state: ExtendedState) -> ExitCode {
    match state {
        ExtendedState::Success => ExitCode::Success,
        ExtendedState::ConfigError => ExitCode::ArgumentOrConfig,
        ExtendedState::Failed | ExtendedState::Cancelled | ExtendedState::None => ExitCode::Runtime,
    }
}
