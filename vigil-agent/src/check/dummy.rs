use super::{CheckResult, CheckRunner, RunContext, Status};
use async_trait::async_trait;

/// Stand-in for a command that could not be built: every run fails with
/// the construction error.
pub struct DummyRunner {
    output: String,
}

impl DummyRunner {
    /// A native check whose type or arguments were rejected.
    pub fn native(command_line: &str, reason: &str) -> Self {
        Self {
            output: format!(
                "unable to execute native check {} , output error : {}",
                command_line, reason
            ),
        }
    }

    /// A process check whose command line could not be prepared.
    pub fn exec(command_line: &str, reason: &str) -> Self {
        Self {
            output: format!("Fail to execute {} : {}", command_line, reason),
        }
    }
}

#[async_trait]
impl CheckRunner for DummyRunner {
    fn kind(&self) -> &'static str {
        "dummy"
    }

    async fn run(&self, _ctx: RunContext) -> CheckResult {
        CheckResult::single(Status::Critical, self.output.clone())
    }
}
