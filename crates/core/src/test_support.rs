//! Scripted command runner for unit tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::ExecError;
use crate::exec::{command_line, CommandOutput, CommandRunner};

struct Rule {
    prefix: String,
    responses: VecDeque<CommandOutput>,
}

/// Records every command and answers from prefix rules. The first rule whose
/// prefix matches the command line wins; unmatched commands succeed with
/// empty output.
pub(crate) struct FakeRunner {
    work_dir: PathBuf,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new(work_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            work_dir: work_dir.into(),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answer commands starting with `prefix` with `output`.
    pub(crate) fn on(&self, prefix: &str, output: CommandOutput) {
        self.on_seq(prefix, vec![output]);
    }

    /// Answer successive matching commands in order; the last response
    /// repeats once the others are used up.
    pub(crate) fn on_seq(&self, prefix: &str, outputs: Vec<CommandOutput>) {
        self.rules.lock().expect("rules lock poisoned").push(Rule {
            prefix: prefix.to_string(),
            responses: outputs.into(),
        });
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        let line = command_line(program, args);
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(line.clone());

        let mut rules = self.rules.lock().expect("rules lock poisoned");
        let response = rules
            .iter_mut()
            .find(|rule| line.starts_with(&rule.prefix))
            .and_then(|rule| {
                if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                }
            });
        Ok(response.unwrap_or_else(|| CommandOutput::ok("")))
    }
}
