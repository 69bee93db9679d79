// ABOUTME: Maps builder failures onto stage-tagged user errors
// ABOUTME: Command failures keep their stage label, everything else is a remote deploy failure

use crate::builder::BuildError;
use crate::error::{
    DestroyError, Stage, StagedError, UserError, BUILD_FAILURE_CONTEXT, COMMAND_FAILURE_CONTEXT,
};

pub fn classify_build_error(error: BuildError) -> StagedError {
    let (stage, user_error) = match error {
        BuildError::Command { stage, cause } => {
            let stage = if stage.is_empty() {
                Stage::RemoteDeploy
            } else {
                Stage::Command(stage)
            };
            (stage, UserError::wrap(COMMAND_FAILURE_CONTEXT, cause))
        }
        // Already user-facing, don't wrap it twice
        BuildError::User(user_error) => (Stage::RemoteDeploy, user_error),
        BuildError::Other(cause) => (Stage::RemoteDeploy, UserError::wrap(BUILD_FAILURE_CONTEXT, cause)),
    };

    StagedError::new(stage, DestroyError::User(user_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_error_keeps_stage() {
        let staged = classify_build_error(BuildError::Command {
            stage: "installer".to_string(),
            cause: anyhow!("helm uninstall failed"),
        });

        assert_eq!(staged.stage, Stage::Command("installer".to_string()));
        assert_eq!(staged.stage.as_str(), "installer");
        assert!(staged.user_facing);
        assert_eq!(
            staged.to_string(),
            "error during development environment deployment: helm uninstall failed"
        );
    }

    #[test]
    fn test_command_error_without_label() {
        let staged = classify_build_error(BuildError::Command {
            stage: String::new(),
            cause: anyhow!("boom"),
        });

        assert_eq!(staged.stage, Stage::RemoteDeploy);
    }

    #[test]
    fn test_user_error_passes_through() {
        let user = UserError::new(anyhow!("namespace not found"));

        let staged = classify_build_error(BuildError::User(user));

        assert_eq!(staged.stage, Stage::RemoteDeploy);
        assert_eq!(staged.to_string(), "namespace not found");
        assert!(staged.user_facing);
    }

    #[test]
    fn test_other_error_is_wrapped() {
        let staged = classify_build_error(BuildError::Other(anyhow!("daemon unreachable")));

        assert_eq!(staged.stage, Stage::RemoteDeploy);
        assert!(staged.user_facing);
        assert_eq!(
            staged.to_string(),
            "error during destroy of the development environment: daemon unreachable"
        );
    }
}
