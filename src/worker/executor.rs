use std::process::Stdio;

use tokio::process::Command;

use crate::graph::{Cmd, JobContext};

/// Accumulated result of a job's command sequence.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub error: Option<String>,
}

/// Render and run a job's commands in order, accumulating output across
/// them. Stops at the first command that fails; the outcome then carries
/// the real exit code and an error message.
pub async fn run_commands(cmds: &[Cmd], ctx: &JobContext) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome::default();
    for cmd in cmds {
        let rendered = cmd.render(ctx);
        if !rendered.exec.is_empty() && !run_exec(&rendered, &mut outcome).await {
            break;
        }
        if !rendered.cat_output.is_empty() {
            if let Err(err) =
                tokio::fs::write(&rendered.cat_output, rendered.cat_template.as_bytes()).await
            {
                outcome.exit_code = 1;
                outcome.error = Some(format!("writing {}: {}", rendered.cat_output, err));
                break;
            }
        }
    }
    outcome
}

async fn run_exec(cmd: &Cmd, outcome: &mut ExecutionOutcome) -> bool {
    let mut command = Command::new(&cmd.exec[0]);
    command
        .args(&cmd.exec[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for pair in &cmd.environ {
        if let Some((key, value)) = pair.split_once('=') {
            command.env(key, value);
        }
    }
    if let Some(dir) = &cmd.working_directory {
        command.current_dir(dir);
    }

    tracing::debug!(argv = ?cmd.exec, "exec");
    match command.output().await {
        Ok(output) => {
            outcome
                .stdout
                .push_str(&String::from_utf8_lossy(&output.stdout));
            outcome
                .stderr
                .push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                true
            } else {
                let code = output.status.code().unwrap_or(-1);
                outcome.exit_code = code;
                outcome.error = Some(format!(
                    "command {:?} exited with code {}",
                    cmd.exec[0], code
                ));
                false
            }
        }
        Err(err) => {
            outcome.exit_code = 1;
            outcome.error = Some(format!("command {:?} failed to start: {}", cmd.exec[0], err));
            false
        }
    }
}
