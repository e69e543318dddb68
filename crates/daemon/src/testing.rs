//! Scripted tool runner shared by the unit tests

use crate::process::{ToolCommand, ToolOutcome, ToolRunner};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&ToolCommand) -> ToolOutcome + Send + Sync>;

/// Answers each command with a closure and records every call
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<ToolCommand>>,
    respond: Responder,
}

impl ScriptedRunner {
    pub(crate) fn new<F>(respond: F) -> Self
    where
        F: Fn(&ToolCommand) -> ToolOutcome + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    /// ffprobe reports `duration` and a 1280x720 stream; ffmpeg writes a
    /// non-empty output file
    pub(crate) fn media(duration: &'static str) -> Self {
        Self::new(move |cmd| {
            if is_probe(cmd) {
                success(duration)
            } else if is_resolution_probe(cmd) {
                success("1280x720\n")
            } else {
                write_output(cmd, b"encoded");
                success("")
            }
        })
    }

    pub(crate) fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, command: &ToolCommand) -> ToolOutcome {
        self.calls.lock().unwrap().push(command.clone());
        (self.respond)(command)
    }
}

pub(crate) fn success(stdout: &str) -> ToolOutcome {
    ToolOutcome::Success {
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub(crate) fn failed(stderr: &str) -> ToolOutcome {
    ToolOutcome::Failed {
        exit_code: Some(1),
        stderr: stderr.to_string(),
    }
}

pub(crate) fn is_probe(cmd: &ToolCommand) -> bool {
    cmd.has_flag_with_value("-show_entries", "format=duration")
}

pub(crate) fn is_resolution_probe(cmd: &ToolCommand) -> bool {
    cmd.has_flag_with_value("-show_entries", "stream=width,height")
}

pub(crate) fn is_poster(cmd: &ToolCommand) -> bool {
    cmd.has_flag_with_value("-vframes", "1")
}

pub(crate) fn is_preview(cmd: &ToolCommand) -> bool {
    cmd.has_flag_with_value("-c:v", "libx264")
}

/// Write `bytes` to the command's output path (its last argument)
pub(crate) fn write_output(cmd: &ToolCommand, bytes: &[u8]) {
    let out = cmd.args.last().expect("command has an output path");
    std::fs::write(Path::new(out), bytes).expect("write fake output");
}
