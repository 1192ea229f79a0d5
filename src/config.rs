use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Runtime configuration, read once at startup from `VENUECAST_*` variables.
///
/// Every value has a default that matches the installer layout on the player
/// (`/opt/venuecast/shared`), so a bare `venuecast-engine` invocation works on
/// a provisioned box.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub video_dir: PathBuf,
    pub cec_client: String,
    pub mpv: String,
    pub ffprobe: String,
    pub ffmpeg: String,
    /// OSD name this box announces on the CEC bus.
    pub osd_name: String,
    /// Device name used in the HDMI port map to mark this box's port.
    pub self_device_name: String,
    pub command_timeout: Duration,
    pub fullscreen: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind: SocketAddr = env_or("VENUECAST_BIND", "0.0.0.0:5000")
            .parse()
            .context("VENUECAST_BIND is not a socket address")?;

        let data_dir = PathBuf::from(env_or("VENUECAST_DATA_DIR", "/opt/venuecast/shared"));
        let video_dir = lookup("VENUECAST_VIDEO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploaded_videos"));

        let timeout_secs: u64 = env_or("VENUECAST_COMMAND_TIMEOUT_SECS", "10")
            .parse()
            .context("VENUECAST_COMMAND_TIMEOUT_SECS is not an integer")?;
        if timeout_secs == 0 {
            anyhow::bail!("VENUECAST_COMMAND_TIMEOUT_SECS must be positive");
        }

        let fullscreen = !matches!(
            env_or("VENUECAST_FULLSCREEN", "1").as_str(),
            "0" | "false" | "no"
        );

        Ok(Self {
            bind,
            data_dir,
            video_dir,
            cec_client: env_or("VENUECAST_CEC_CLIENT", "cec-client"),
            mpv: env_or("VENUECAST_MPV", "mpv"),
            ffprobe: env_or("VENUECAST_FFPROBE", "ffprobe"),
            ffmpeg: env_or("VENUECAST_FFMPEG", "ffmpeg"),
            osd_name: env_or("VENUECAST_OSD_NAME", "RaspberryPi"),
            self_device_name: env_or("VENUECAST_SELF_DEVICE", "raspberry pi"),
            command_timeout: Duration::from_secs(timeout_secs),
            fullscreen,
        })
    }

    pub fn last_played_path(&self) -> PathBuf {
        self.data_dir.join("last_played.json")
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.data_dir.join("schedule.json")
    }

    pub fn current_input_path(&self) -> PathBuf {
        self.data_dir.join("current_input.json")
    }

    pub fn port_map_path(&self) -> PathBuf {
        self.data_dir.join("hdmi_devices.json")
    }

    pub fn preview_dir(&self) -> PathBuf {
        self.video_dir.join("compressed")
    }

    pub fn mpv_socket_path(&self) -> PathBuf {
        self.data_dir.join("mpv.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_match_installer_layout() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind.port(), 5000);
        assert_eq!(cfg.video_dir, PathBuf::from("/opt/venuecast/shared/uploaded_videos"));
        assert_eq!(cfg.schedule_path(), PathBuf::from("/opt/venuecast/shared/schedule.json"));
        assert_eq!(cfg.port_map_path(), PathBuf::from("/opt/venuecast/shared/hdmi_devices.json"));
        assert_eq!(cfg.command_timeout, Duration::from_secs(10));
        assert!(cfg.fullscreen);
    }

    #[test]
    fn overrides_and_derived_paths() {
        let cfg = config(&[
            ("VENUECAST_DATA_DIR", "/srv/player"),
            ("VENUECAST_FULLSCREEN", "no"),
            ("VENUECAST_COMMAND_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.video_dir, PathBuf::from("/srv/player/uploaded_videos"));
        assert_eq!(cfg.preview_dir(), PathBuf::from("/srv/player/uploaded_videos/compressed"));
        assert_eq!(cfg.command_timeout, Duration::from_secs(3));
        assert!(!cfg.fullscreen);
    }

    #[test]
    fn invalid_values_fail_startup() {
        assert!(config(&[("VENUECAST_BIND", "not an address")]).is_err());
        assert!(config(&[("VENUECAST_COMMAND_TIMEOUT_SECS", "0")]).is_err());
        assert!(config(&[("VENUECAST_COMMAND_TIMEOUT_SECS", "ten")]).is_err());
    }
}
