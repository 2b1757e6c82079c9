//! Named scaffolding generators, run before the agent when a story asks for one.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{command_from_argv, run_command, write_log};

const SCAFFOLD_OUTPUT_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct ScaffoldRequest {
    pub workdir: PathBuf,
    pub skill: String,
    pub story_id: String,
    pub log_path: PathBuf,
    pub timeout: Duration,
}

pub trait Scaffolder {
    /// Run the named generator. Any error is reported to the caller, which
    /// treats it as a warning.
    fn scaffold(&self, request: &ScaffoldRequest) -> Result<()>;
}

/// Runs `<command...> <skill> <story id>`.
#[derive(Debug, Clone)]
pub struct CommandScaffolder {
    command: Vec<String>,
}

impl CommandScaffolder {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Scaffolder for CommandScaffolder {
    #[instrument(skip_all, fields(skill = %request.skill, story_id = %request.story_id))]
    fn scaffold(&self, request: &ScaffoldRequest) -> Result<()> {
        if self.command.is_empty() {
            debug!("no scaffold command configured");
            return Ok(());
        }
        let mut argv = self.command.clone();
        argv.push(request.skill.clone());
        argv.push(request.story_id.clone());
        let mut cmd = command_from_argv(&argv)?;
        cmd.current_dir(&request.workdir);

        let output = run_command(
            cmd,
            None,
            Some(request.timeout),
            SCAFFOLD_OUTPUT_LIMIT,
            None,
        )
        .with_context(|| format!("run scaffold {}", argv.join(" ")))?;
        write_log(
            &request.log_path,
            &output.render_log("scaffold", SCAFFOLD_OUTPUT_LIMIT),
        )?;

        if output.timed_out {
            return Err(anyhow!("scaffold '{}' timed out", request.skill));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "scaffold '{}' failed with status {:?}",
                request.skill,
                output.status.code()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &tempfile::TempDir) -> ScaffoldRequest {
        ScaffoldRequest {
            workdir: temp.path().to_path_buf(),
            skill: "component".to_string(),
            story_id: "US-3".to_string(),
            log_path: temp.path().join("scaffold.log"),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn appends_skill_and_story_id_to_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scaffolder = CommandScaffolder::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf '%s %s' \"$0\" \"$1\" > args.txt".to_string(),
        ]);
        scaffolder.scaffold(&request(&temp)).expect("scaffold");

        let args = std::fs::read_to_string(temp.path().join("args.txt")).expect("args");
        assert_eq!(args, "component US-3");
    }

    #[test]
    fn failing_generator_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scaffolder = CommandScaffolder::new(vec!["false".to_string()]);
        let err = scaffolder.scaffold(&request(&temp)).unwrap_err();
        assert!(err.to_string().contains("scaffold 'component' failed"));
    }

    #[test]
    fn empty_command_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        CommandScaffolder::new(Vec::new())
            .scaffold(&request(&temp))
            .expect("no-op");
        assert!(!temp.path().join("scaffold.log").exists());
    }
}
