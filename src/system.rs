use serde::Serialize;
use sysinfo::System;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub hostname: Option<String>,
    pub cpu_model: String,
    pub cpu_cores: usize,
    pub load_1m: f32,
    pub load_5m: f32,
    pub load_15m: f32,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub uptime_secs: u64,
    pub temp_c: Option<f32>,
}

pub struct SystemMonitor {
    version: String,
    sys: Mutex<System>,
}

impl SystemMonitor {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            sys: Mutex::new(System::new_all()),
        }
    }

    pub async fn snapshot(&self) -> SystemInfo {
        let mut sys = self.sys.lock().await;
        sys.refresh_all();

        let cpu_model = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "Unknown CPU".to_string());
        let la = System::load_average();

        SystemInfo {
            name: "VenueCast Player".to_string(),
            version: self.version.clone(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: System::host_name(),
            cpu_model,
            cpu_cores: sys.cpus().len(),
            load_1m: la.one as f32,
            load_5m: la.five as f32,
            load_15m: la.fifteen as f32,
            memory_total_bytes: sys.total_memory(),
            memory_used_bytes: sys.used_memory(),
            uptime_secs: System::uptime(),
            temp_c: read_temp_c(),
        }
    }
}

const TEMP_PATHS: [&str; 2] = [
    "/sys/class/thermal/thermal_zone0/temp",
    "/sys/class/hwmon/hwmon0/temp1_input",
];

/// SoC temperature from sysfs; `None` on hosts without a thermal zone.
fn read_temp_c() -> Option<f32> {
    TEMP_PATHS
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .find_map(|s| parse_temp(&s))
}

// sysfs reports millidegrees; some drivers report degrees.
fn parse_temp(raw: &str) -> Option<f32> {
    let v: f32 = raw.trim().parse().ok()?;
    Some(if v > 1000.0 { v / 1000.0 } else { v })
}
