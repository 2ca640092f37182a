use serde::{Deserialize, Serialize};

use super::DeviceId;

/// Device credentials.
///
/// `Debug` is implemented by hand so passwords never reach logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

/// Read-only snapshot of a registered camera.
///
/// Owned by the external record store; the core never mutates one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    /// Network address (IP or hostname, without scheme)
    pub address: String,
    pub credentials: Credentials,
    /// Supports pan/tilt control
    pub controllable: bool,
    /// Supports continuous recording
    pub recordable: bool,
    pub enabled: bool,
    /// Per-device override for the segment rotation interval
    #[serde(default)]
    pub segment_seconds: Option<u64>,
}

/// Relative pan/tilt command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PtzCommand {
    Up,
    Down,
    Left,
    Right,
    Stop,
}

impl PtzCommand {
    /// Relative (pan, tilt) translation for this command.
    ///
    /// Small step size for micro-movements; `Stop` has no translation.
    #[must_use]
    pub const fn translation(self) -> Option<(f32, f32)> {
        const STEP: f32 = 0.05;
        match self {
            Self::Up => Some((0.0, STEP)),
            Self::Down => Some((0.0, -STEP)),
            Self::Left => Some((-STEP, 0.0)),
            Self::Right => Some((STEP, 0.0)),
            Self::Stop => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_ptz_translations() {
        assert_eq!(PtzCommand::Up.translation(), Some((0.0, 0.05)));
        assert_eq!(PtzCommand::Left.translation(), Some((-0.05, 0.0)));
        assert_eq!(PtzCommand::Stop.translation(), None);
    }
}
