use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenMode {
    #[default]
    Standby,
    Chat,
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoControl {
    Play,
    Pause,
    Stop,
    Skip,
}

/// Main-screen element whose visibility the operator can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UiTarget {
    Comments,
    ScriptPanel,
    StatusBar,
    Subtitles,
}

/// Operator command. Commands are declarative: applying one twice leaves the
/// screen in the same state as applying it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    ModeSelect {
        mode: ScreenMode,
    },
    ControlVideo {
        action: VideoControl,
    },
    SendScript {
        script: String,
    },
    ToggleIntegration {
        enabled: bool,
    },
    SetUiVisibility {
        target: UiTarget,
        visible: bool,
    },
    #[serde(rename_all = "camelCase")]
    SendQueuedComment {
        comment_id: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid command payload: {0}")]
    Malformed(String),
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}

impl Command {
    /// Parses and validates a command from its JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self, CommandError> {
        let command: Command =
            serde_json::from_slice(body).map_err(|err| CommandError::Malformed(err.to_string()))?;
        command.validate()?;
        Ok(command)
    }

    /// Checks constraints the type system does not carry.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Command::SendScript { script } if script.trim().is_empty() => {
                Err(CommandError::EmptyField { field: "script" })
            }
            Command::SendQueuedComment { comment_id } if comment_id.trim().is_empty() => {
                Err(CommandError::EmptyField { field: "commentId" })
            }
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::ModeSelect { .. } => "mode-select",
            Command::ControlVideo { .. } => "control-video",
            Command::SendScript { .. } => "send-script",
            Command::ToggleIntegration { .. } => "toggle-integration",
            Command::SetUiVisibility { .. } => "set-ui-visibility",
            Command::SendQueuedComment { .. } => "send-queued-comment",
        }
    }
}
