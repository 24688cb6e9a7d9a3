//! Cloud CLI command execution.
//!
//! Runs `aws` CLI commands and maps failures to [`CloudError`].

use super::error::{CloudError, CloudResult};
use colored::Colorize;
use regex::Regex;
use std::process::Command;
use std::sync::OnceLock;

/// Largest stdout accepted from one command.
const MAX_STDOUT_BYTES: usize = 2_000_000;

/// Regex for splitting command strings while preserving quoted substrings.
static COMMAND_REGEX: OnceLock<Regex> = OnceLock::new();

/// Regex for the service error code, e.g. `An error occurred (InvalidVpcID.NotFound) when calling`.
static ERROR_CODE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_command_regex() -> &'static Regex {
    COMMAND_REGEX.get_or_init(|| {
        Regex::new(r#"'([^']*)'\s*|\"([^\"]*)\"\s*|([^'\s]*)\s*"#).expect("Invalid Regex")
    })
}

fn get_error_code_regex() -> &'static Regex {
    ERROR_CODE_REGEX.get_or_init(|| {
        Regex::new(r"An error occurred \(([A-Za-z0-9.]+)\)").expect("Invalid Regex")
    })
}

/// Wrap a value in single quotes so it survives [`split_and_strip`].
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', ""))
}

/// Run a shell command and return its stdout.
///
/// The command string is split on spaces, with quoted substrings preserved.
/// `envs` are set on the child process only.
///
/// # Returns
/// * `Ok(String)` - The stdout output on success
/// * `Err(CloudError::Api)` - When stderr carries a service error code
/// * `Err(CloudError::Command)` - Otherwise
pub fn run(cmd: &str, envs: &[(&str, String)]) -> CloudResult<String> {
    log::debug!("run({cmd})", cmd = cmd.on_blue());

    let cmds: Vec<&str> = split_and_strip(cmd);
    log::trace!("split cmds={:?}", cmds);
    let (program, args) = cmds
        .split_first()
        .ok_or_else(|| CloudError::Command("empty command".to_string()))?;

    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = command.output().map_err(|e| {
        log::error!("Command execution failed: {}", e);
        CloudError::Command(format!("failed to execute {program}: {e}"))
    })?;

    if output.status.success() {
        log::debug!("Success cmd: {cmd}");
        log::debug!("Success output.stdout.len(): {}", output.stdout.len());

        if output.stdout.len() > MAX_STDOUT_BYTES {
            return Err(CloudError::Command(format!(
                "response too large: {} bytes for command: {:?}",
                output.stdout.len(),
                cmds
            )));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::trace!(
            "code={code:?}, status={status}\n┎######\nstderr=\n{stderr}\n┖######",
            code = output.status.code(),
            status = output.status,
            stderr = stderr.red()
        );
        log::warn!(
            "{failed} to run {cmd}",
            failed = "failed".on_red(),
            cmd = cmd.on_blue()
        );
        return Err(error_from_stderr(&stderr));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| CloudError::Command(format!("invalid UTF-8 in output: {e}")))
}

/// Map CLI stderr to a [`CloudError`].
pub fn error_from_stderr(stderr: &str) -> CloudError {
    let stderr = stderr.trim();
    match get_error_code_regex().captures(stderr) {
        Some(caps) => {
            let message = stderr
                .split_once("operation: ")
                .map(|(_, m)| m)
                .unwrap_or(stderr);
            CloudError::api(&caps[1], message)
        }
        None => CloudError::Command(stderr.to_string()),
    }
}

/// Split a command string on spaces, preserving quoted substrings.
fn split_and_strip(input: &str) -> Vec<&str> {
    get_command_regex()
        .find_iter(input)
        .map(|m| m.as_str().trim().trim_matches('\'').trim_matches('"'))
        .collect()
}
