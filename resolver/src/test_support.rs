//! Test-only fakes and builders.
//!
//! [`ScriptedRunner`] and [`ScriptedAdvisor`] stand in for the shell and the
//! oracle so loop scenarios run without spawning processes.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::apply::ApplyConfig;
use crate::consult::ConsultConfig;
use crate::core::types::{OverallStatus, Recommendation, Solution, SolutionType};
use crate::io::advisor::{AdviceRequest, Advisor};
use crate::io::command::{CommandResult, CommandRunner, CommandStatus};
use crate::resolve::ResolveConfig;

/// Command runner returning scripted results per command string.
///
/// Results registered for the same command are returned in order and the
/// last one repeats. Unknown commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: RefCell<HashMap<String, VecDeque<CommandResult>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, command: &str, status: CommandStatus, output: &str) -> Self {
        let exit_code = match status {
            CommandStatus::Success => Some(0),
            CommandStatus::Failed => Some(1),
            CommandStatus::TimedOut => None,
        };
        self.scripts
            .borrow_mut()
            .entry(command.to_string())
            .or_default()
            .push_back(CommandResult {
                status,
                output: output.to_string(),
                exit_code,
            });
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == command).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, _timeout: Duration) -> CommandResult {
        self.calls.borrow_mut().push(command.to_string());
        let mut scripts = self.scripts.borrow_mut();
        match scripts.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(succeeded),
            Some(queue) => queue.front().cloned().unwrap_or_else(succeeded),
            None => succeeded(),
        }
    }
}

fn succeeded() -> CommandResult {
    CommandResult {
        status: CommandStatus::Success,
        output: String::new(),
        exit_code: Some(0),
    }
}

/// Advisor returning scripted responses in order.
///
/// `Err` entries simulate transport failures. Once the script runs out every
/// call fails.
#[derive(Debug, Default)]
pub struct ScriptedAdvisor {
    responses: RefCell<VecDeque<std::result::Result<String, String>>>,
    requests: RefCell<Vec<AdviceRequest>>,
}

impl ScriptedAdvisor {
    pub fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AdviceRequest> {
        self.requests.borrow().clone()
    }
}

impl Advisor for ScriptedAdvisor {
    fn advise(&self, request: &AdviceRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("scripted advisor has no response left")),
        }
    }
}

/// A `commands` solution without verification.
pub fn command_solution(description: &str, priority: i64, commands: &[&str]) -> Solution {
    Solution {
        solution_type: SolutionType::Commands,
        priority,
        description: description.to_string(),
        undo_commands: Vec::new(),
        commands: commands.iter().map(|cmd| cmd.to_string()).collect(),
        verification_command: None,
        web_verified: false,
        source: None,
        expected_outcome: None,
        different_because: None,
        user_actions: Vec::new(),
        search_query: None,
    }
}

/// A `commands` solution gated by `verification`.
pub fn verified_solution(
    description: &str,
    priority: i64,
    commands: &[&str],
    verification: &str,
) -> Solution {
    Solution {
        verification_command: Some(verification.to_string()),
        ..command_solution(description, priority, commands)
    }
}

/// A solution of any type with no commands.
pub fn solution_of_type(description: &str, solution_type: SolutionType) -> Solution {
    Solution {
        solution_type,
        ..command_solution(description, 1, &[])
    }
}

pub fn recommendation(status: OverallStatus, solutions: Vec<Solution>) -> Recommendation {
    Recommendation {
        overall_status: status,
        summary: String::new(),
        issues_found: Vec::new(),
        recommended_solutions: Some(solutions),
        should_continue: None,
        web_searches_performed: Vec::new(),
        alternative_packages: Vec::new(),
        root_cause_analysis: None,
        new_strategy: None,
        confidence_level: None,
        next_steps: None,
        prevention_tips: Vec::new(),
        raw_response: None,
    }
}

/// Oracle response JSON offering `solutions`.
pub fn advice_json(solutions: &[Solution]) -> String {
    let rec = recommendation(OverallStatus::NeedsAttention, solutions.to_vec());
    serde_json::to_string(&rec).unwrap_or_default()
}

/// Apply settings without pauses.
pub fn fast_apply_config() -> ApplyConfig {
    ApplyConfig {
        command_timeout: Duration::from_secs(5),
        command_pause: Duration::ZERO,
    }
}

/// Resolve settings writing every artifact under `dir`, without pauses.
pub fn test_resolve_config(dir: &Path) -> ResolveConfig {
    ResolveConfig {
        apply: fast_apply_config(),
        consult: ConsultConfig {
            artifacts_dir: dir.join("artifacts"),
            ..ConsultConfig::default()
        },
        log_path: dir.join("resolution_log.json"),
        ..ResolveConfig::default()
    }
}
