//! Interactive experiment session.
//!
//! The operator walks a participant's trial blocks in file order. For each
//! block they choose to run it (`current`), step back (`previous`) or move
//! on (`skip`). Running a block writes `CurrentBlock` into the simulator's
//! experiment file, then either launches the scenario runner alongside the
//! controller loop or, for blocks without a scenario, reloads the world so
//! the simulator picks up the new block.

use std::io::{BufRead, Write};
use std::process::ExitStatus;

use handover_core::config::{ControllerConfig, SessionConfig};
use handover_data::{ExperimentConfig, TrialBlock, copy_config, set_current_block};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::error::ControllerError;
use crate::trial;
use crate::vehicle::NatsVehicle;

/// The operator's answer at a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Run the block shown.
    Current,
    /// Go back one block.
    Previous,
    /// Move on without running.
    Skip,
}

impl Choice {
    /// Parse an answer, ignoring case and surrounding whitespace.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "current" => Some(Self::Current),
            "previous" => Some(Self::Previous),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Block index after answering `choice` at `index`.
///
/// `previous` stops at the first block. Both `current` and `skip` advance.
pub const fn next_index(index: usize, choice: Choice) -> usize {
    match choice {
        Choice::Previous => index.saturating_sub(1),
        Choice::Current | Choice::Skip => index.saturating_add(1),
    }
}

/// Ask until the operator gives a valid answer.
///
/// # Errors
///
/// Returns [`ControllerError::Prompt`] if input ends or cannot be read.
pub fn prompt(input: &mut impl BufRead, output: &mut impl Write) -> Result<Choice, ControllerError> {
    write!(
        output,
        "Choices: 'current' (start this block), 'previous' (go back), 'skip' (skip this block). Enter choice: "
    )?;
    loop {
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        if let Some(choice) = Choice::parse(&line) {
            return Ok(choice);
        }
        write!(output, "Invalid input. Choose from current, previous, skip. Enter choice: ")?;
    }
}

/// Print a block's settings ahead of the prompt.
///
/// # Errors
///
/// Returns [`ControllerError::Prompt`] if `output` cannot be written.
pub fn describe(block: &TrialBlock, output: &mut impl Write) -> Result<(), ControllerError> {
    writeln!(output, "=================================")?;
    writeln!(output, "Trial [{}] is configured.", block.name)?;
    writeln!(output, "SkipSR: {}", block.skip_scenario_runner)?;
    writeln!(output, "NDRTTaskType: {}", block.task_type)?;
    writeln!(output, "TaskSetting: {}", block.task_setting)?;
    writeln!(output, "InterruptionMethod: {}", block.interruption_method)?;
    writeln!(output, "Traffic: {}", block.traffic)?;
    writeln!(output, "=================================")?;
    Ok(())
}

/// Program and arguments of the scenario runner for `traffic`.
///
/// # Errors
///
/// Returns [`ControllerError::ScenarioRunner`] if the configured command is
/// empty.
pub fn scenario_invocation(session: &SessionConfig, traffic: &str) -> Result<(String, Vec<String>), ControllerError> {
    let mut command = session.scenario_command_for(traffic).into_iter();
    let program = command.next().ok_or_else(|| ControllerError::ScenarioRunner {
        message: "session.scenario_command is empty".to_owned(),
    })?;
    Ok((program, command.collect()))
}

fn spawn_scenario_runner(session: &SessionConfig, traffic: &str) -> Result<Child, ControllerError> {
    let (program, args) = scenario_invocation(session, traffic)?;
    let child = Command::new(&program)
        .args(&args)
        .current_dir(&session.scenario_runner_dir)
        .spawn()
        .map_err(|e| ControllerError::ScenarioRunner {
            message: format!(
                "failed to start {program} in {}: {e}",
                session.scenario_runner_dir.display()
            ),
        })?;
    info!(program = %program, traffic, pid = child.id(), "Scenario runner started");
    Ok(child)
}

/// Run the interactive session for `participant`.
///
/// # Errors
///
/// Returns [`ControllerError`] if the participant file cannot be copied or
/// loaded, or the prompt fails. A failing block is logged and the session
/// continues.
pub async fn run_session(
    client: &async_nats::Client,
    config: &ControllerConfig,
    participant: &str,
) -> Result<(), ControllerError> {
    let session = &config.session;
    copy_config(&session.participant_file(participant), &session.experiment_config_path)?;
    let experiment = ExperimentConfig::load(&session.experiment_config_path)?;
    let blocks = experiment.blocks();
    info!(participant, blocks = blocks.len(), "Session starting");

    let mut index = 0;
    while let Some(block) = blocks.get(index) {
        let choice = tokio::task::block_in_place(|| {
            let mut stdout = std::io::stdout();
            describe(block, &mut stdout)?;
            prompt(&mut std::io::stdin().lock(), &mut stdout)
        })?;

        if choice == Choice::Current
            && let Err(err) = run_selected(client, config, &experiment, block).await
        {
            error!(block = %block.name, %err, "Trial block failed");
        }
        index = next_index(index, choice);
    }

    info!(participant, "Session complete");
    Ok(())
}

/// Run one selected block.
async fn run_selected(
    client: &async_nats::Client,
    config: &ControllerConfig,
    experiment: &ExperimentConfig,
    block: &TrialBlock,
) -> Result<(), ControllerError> {
    let session = &config.session;
    set_current_block(&session.experiment_config_path, &block.name)?;

    if block.skip_scenario_runner {
        tokio::time::sleep(config.timing.reload_settle()).await;
        // Reloads are slow; allow the frame deadline.
        let vehicle = NatsVehicle::new(client.clone(), &config.transport, config.timing.frame_timeout());
        vehicle.reload_world().await?;
        info!(block = %block.name, "World reloaded");
        return Ok(());
    }

    let mut child = spawn_scenario_runner(session, &block.traffic)?;
    let (status, result) = tokio::join!(
        child.wait(),
        trial::run_block(client, config, experiment, &block.name)
    );
    log_runner_exit(&block.name, status);
    result.map(|_| ())
}

fn log_runner_exit(block: &str, status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => info!(block, "Scenario runner finished"),
        Ok(status) => warn!(block, %status, "Scenario runner exited with failure"),
        Err(err) => warn!(block, %err, "Failed to wait for scenario runner"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn choices_parse_loosely() {
        assert_eq!(Choice::parse(" Current\n"), Some(Choice::Current));
        assert_eq!(Choice::parse("PREVIOUS"), Some(Choice::Previous));
        assert_eq!(Choice::parse("skip"), Some(Choice::Skip));
        assert_eq!(Choice::parse("next"), None);
    }

    #[test]
    fn previous_stops_at_first_block() {
        assert_eq!(next_index(0, Choice::Previous), 0);
        assert_eq!(next_index(3, Choice::Previous), 2);
        assert_eq!(next_index(3, Choice::Skip), 4);
        assert_eq!(next_index(3, Choice::Current), 4);
    }

    #[test]
    fn prompt_repeats_until_valid() {
        let mut input = Cursor::new("maybe\n\nskip\n");
        let mut output = Vec::new();
        let choice = prompt(&mut input, &mut output).unwrap();
        assert_eq!(choice, Choice::Skip);
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("Invalid input").count(), 2);
    }

    #[test]
    fn prompt_fails_at_end_of_input() {
        let mut input = Cursor::new("later\n");
        let err = prompt(&mut input, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ControllerError::Prompt { .. }));
    }

    #[test]
    fn invocation_substitutes_traffic() {
        let session = SessionConfig::default();
        let (program, args) = scenario_invocation(&session, "3RV").unwrap();
        assert_eq!(program, "python");
        assert!(args.contains(&"srunner/data/traffic_complexity_3RV.json".to_owned()));

        let empty = SessionConfig {
            scenario_command: Vec::new(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            scenario_invocation(&empty, "1RV").unwrap_err(),
            ControllerError::ScenarioRunner { .. }
        ));
    }

    #[test]
    fn describe_lists_block_settings() {
        let block = TrialBlock {
            name: "Block1Trial4".to_owned(),
            skip_scenario_runner: false,
            task_type: "VisualNBackTask".to_owned(),
            task_setting: "Two".to_owned(),
            interruption_method: "Scheduled".to_owned(),
            traffic: "2RV".to_owned(),
        };
        let mut output = Vec::new();
        describe(&block, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Trial [Block1Trial4] is configured."));
        assert!(text.contains("InterruptionMethod: Scheduled"));
    }
}
