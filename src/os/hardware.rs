use log::{info, warn};
use std::fs;
use std::path::PathBuf;

/// Board bring-up hook run before the network unit starts. Fire and forget:
/// failures are reported, never propagated.
pub trait BoardInit: Send {
    fn init(&mut self);
}

/// Nothing to initialise.
#[derive(Debug, Default)]
pub struct NoBoard;

impl BoardInit for NoBoard {
    fn init(&mut self) {
        info!("No board hardware to initialise");
    }
}

/// Status LEDs exposed through the Linux LED class (`/sys/class/leds/<name>`).
/// Every configured LED is switched on to show the firmware is alive.
#[derive(Debug)]
pub struct StatusLeds {
    root: PathBuf,
    leds: Vec<String>,
}

impl StatusLeds {
    pub fn new(leds: Vec<String>) -> Self {
        Self::with_root("/sys/class/leds", leds)
    }

    pub fn with_root(root: impl Into<PathBuf>, leds: Vec<String>) -> Self {
        StatusLeds {
            root: root.into(),
            leds,
        }
    }
}

impl BoardInit for StatusLeds {
    fn init(&mut self) {
        for led in &self.leds {
            let path = self.root.join(led).join("brightness");
            match fs::write(&path, b"1") {
                Ok(()) => info!("Status LED {} on", led),
                Err(e) => warn!("Could not switch on LED {} ({}): {}", led, path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_leds_written_and_missing_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("led0")).unwrap();
        let mut board = StatusLeds::with_root(dir.path(), vec!["led0".into(), "missing".into()]);
        board.init();
        assert_eq!(fs::read_to_string(dir.path().join("led0/brightness")).unwrap(), "1");
    }
}
