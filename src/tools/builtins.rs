//! Built-in desktop actions: launching applications and starting music.

use super::{ToolHandler, required_str};
use crate::error::{AssistantError, Result};
use std::process::{Command, Stdio};
use tracing::info;

/// Launch a desktop application by name.
pub struct OpenApp;

impl ToolHandler for OpenApp {
    fn name(&self) -> &str {
        "open_app"
    }

    fn description(&self) -> &str {
        "Open a desktop application by name"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "app_name": {
                    "type": "string",
                    "description": "Name of the application, e.g. \"Spotify\" or \"Google Chrome\""
                }
            },
            "required": ["app_name"]
        })
    }

    fn execute(&self, args: &serde_json::Value) -> Result<Option<String>> {
        let app = required_str(args, &["app_name", "appName", "name"])?;
        let mut cmd = launch_command(app);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.spawn()
            .map_err(|e| AssistantError::Tool(format!("failed to open {app}: {e}")))?;
        info!(app, "application launched");
        Ok(Some(format!("Opening {app}.")))
    }
}

#[cfg(target_os = "macos")]
fn launch_command(app: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.args(["-a", app]);
    cmd
}

#[cfg(target_os = "windows")]
fn launch_command(app: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "", app]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn launch_command(app: &str) -> Command {
    Command::new(app)
}

/// Start music playback in Spotify.
pub struct PlayMusic;

impl ToolHandler for PlayMusic {
    fn name(&self) -> &str {
        "play_music"
    }

    fn description(&self) -> &str {
        "Start playing music in Spotify"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: &serde_json::Value) -> Result<Option<String>> {
        play_music()?;
        info!("music playback requested");
        Ok(Some("Playing music.".to_owned()))
    }
}

#[cfg(target_os = "macos")]
fn play_music() -> Result<()> {
    Command::new("osascript")
        .args(["-e", "tell application \"Spotify\" to play"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AssistantError::Tool(format!("failed to control Spotify: {e}")))?;
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn play_music() -> Result<()> {
    Err(AssistantError::Tool(
        "play_music is only supported on macOS".into(),
    ))
}
