//! Host status report: CPU, memory, disk, temperature, uptime and OS version

use crate::config::PathsConfig;
use crate::format::{self, UNAVAILABLE};
use crate::netinfo::{self, NetInterface};
use anyhow::{anyhow, Context};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use sysinfo::{Disks, System};

/// Roots under which the readers look for kernel-provided files
#[derive(Clone, Debug)]
pub struct HostPaths {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub os_release: PathBuf,
}

impl From<&PathsConfig> for HostPaths {
    fn from(paths: &PathsConfig) -> Self {
        Self {
            proc_root: paths.proc_root.clone(),
            sys_root: paths.sys_root.clone(),
            os_release: paths.os_release.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Usage {
    pub formatted: String,
    /// Raw percentage, used for the progress bars
    pub percent: f64,
}

impl Usage {
    fn unavailable() -> Self {
        Self {
            formatted: UNAVAILABLE.to_string(),
            percent: 0.0,
        }
    }

    fn from_bytes(used: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            formatted: format::format_usage(used, total, percent),
            percent,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub hostname: String,
    pub model: String,
    pub cpu_chipset: String,
    pub cpu_frequency: String,
    pub memory: Usage,
    pub disk: Usage,
    pub cpu_usage: f32,
    pub load_average: [String; 3],
    pub cpu_temperature: String,
    pub current_time: String,
    pub uptime: String,
    pub version_info: VersionInfo,
    pub interfaces: Vec<NetInterface>,
}

/// Gather the full report. Blocks for `cpu_sample` while CPU usage is measured.
pub fn collect(paths: &HostPaths, cpu_sample: Duration) -> StatusReport {
    let cpuinfo = fs::read_to_string(paths.proc_root.join("cpuinfo")).unwrap_or_default();
    let cores = physical_cores(&cpuinfo);

    let interfaces = netinfo::list_interfaces(&paths.sys_root).unwrap_or_else(|e| {
        tracing::warn!("Failed to list network interfaces: {}", e);
        Vec::new()
    });

    StatusReport {
        hostname: hostname(paths),
        model: read_first_line(&paths.sys_root.join("devices/virtual/dmi/id/product_family"))
            .unwrap_or_else(|| UNAVAILABLE.to_string()),
        cpu_chipset: cpu_model(&cpuinfo).unwrap_or_else(|| UNAVAILABLE.to_string()),
        cpu_frequency: cpu_frequency(paths, &cpuinfo, cores),
        memory: memory_usage(&paths.proc_root),
        disk: disk_usage(Path::new("/")),
        cpu_usage: cpu_usage(cpu_sample),
        load_average: load_average(&paths.proc_root),
        cpu_temperature: cpu_temperature(&paths.sys_root),
        current_time: chrono::Local::now().format("%a, %d %b %Y %H:%M:%S%z").to_string(),
        uptime: uptime(&paths.proc_root),
        version_info: version_info(&paths.os_release),
        interfaces,
    }
}

pub fn hostname(paths: &HostPaths) -> String {
    read_first_line(&paths.proc_root.join("sys/kernel/hostname")).unwrap_or_else(|| "Unknown".to_string())
}

fn read_first_line(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let line = text.lines().next()?.trim();
    (!line.is_empty()).then(|| line.to_string())
}

fn cpuinfo_values<'a>(cpuinfo: &'a str, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    cpuinfo.lines().filter_map(move |line| {
        let (name, value) = line.split_once(':')?;
        (name.trim() == key).then(|| value.trim())
    })
}

/// Processor model name; ARM boards only carry a `Hardware` line
pub fn cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo_values(cpuinfo, "model name")
        .chain(cpuinfo_values(cpuinfo, "Hardware"))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Count physical cores as distinct (physical id, core id) pairs
pub fn physical_cores(cpuinfo: &str) -> usize {
    let mut cores = HashSet::new();
    for block in cpuinfo.split("\n\n") {
        let physical = cpuinfo_values(block, "physical id").next();
        let core = cpuinfo_values(block, "core id").next();
        if let (Some(physical), Some(core)) = (physical, core) {
            cores.insert((physical, core));
        }
    }
    if cores.is_empty() {
        cpuinfo_values(cpuinfo, "processor").count()
    } else {
        cores.len()
    }
}

fn read_khz_as_mhz(path: &Path) -> Option<f64> {
    let khz: f64 = read_first_line(path)?.parse().ok()?;
    Some(khz / 1000.0)
}

fn cpu_frequency(paths: &HostPaths, cpuinfo: &str, cores: usize) -> String {
    let cpufreq = paths.sys_root.join("devices/system/cpu/cpu0/cpufreq");
    let current = read_khz_as_mhz(&cpufreq.join("scaling_cur_freq")).or_else(|| {
        cpuinfo_values(cpuinfo, "cpu MHz")
            .next()
            .and_then(|v| v.parse().ok())
    });
    let min = read_khz_as_mhz(&cpufreq.join("cpuinfo_min_freq"));

    match current {
        Some(mhz) => format::format_frequency(mhz, min, cores),
        None => UNAVAILABLE.to_string(),
    }
}

/// Used and total bytes from `/proc/meminfo`; used excludes reclaimable memory
pub fn parse_meminfo(meminfo: &str) -> Option<(u64, u64)> {
    let field = |key: &str| -> Option<u64> {
        meminfo.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kb * 1024)
        })
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable").or_else(|| field("MemFree"))?;
    Some((total.saturating_sub(available), total))
}

fn memory_usage(proc_root: &Path) -> Usage {
    fs::read_to_string(proc_root.join("meminfo"))
        .ok()
        .and_then(|text| parse_meminfo(&text))
        .map(|(used, total)| Usage::from_bytes(used, total))
        .unwrap_or_else(Usage::unavailable)
}

fn disk_usage(mount_point: &Path) -> Usage {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == mount_point)
        .map(|disk| disk_usage_from(disk.total_space(), disk.available_space()))
        .unwrap_or_else(Usage::unavailable)
}

/// Usage of a filesystem from its size and the space available to
/// unprivileged users. `sysinfo` does not report the free block count, so
/// blocks reserved for root count as used. On filesystems with a reserve the
/// percentage is slightly higher than `df` shows.
fn disk_usage_from(total: u64, available: u64) -> Usage {
    Usage::from_bytes(total.saturating_sub(available), total)
}

fn cpu_usage(sample: Duration) -> f32 {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    if sample.is_zero() {
        return 0.0;
    }
    std::thread::sleep(sample.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
    sys.refresh_cpu_usage();
    sys.global_cpu_usage()
}

pub fn parse_loadavg(text: &str) -> Option<[String; 3]> {
    let mut fields = text.split_whitespace().map(|f| f.parse::<f64>());
    let mut next = || -> Option<String> { Some(format!("{:.2}", fields.next()?.ok()?)) };
    Some([next()?, next()?, next()?])
}

fn load_average(proc_root: &Path) -> [String; 3] {
    fs::read_to_string(proc_root.join("loadavg"))
        .ok()
        .and_then(|text| parse_loadavg(&text))
        .unwrap_or_else(|| ["0.00".to_string(), "0.00".to_string(), "0.00".to_string()])
}

/// Read the first hwmon sensor that exists. Missing sensors give `N/A`,
/// unreadable ones an error string.
pub fn cpu_temperature(sys_root: &Path) -> String {
    for hwmon in ["hwmon1", "hwmon0"] {
        let path = sys_root.join("class/hwmon").join(hwmon).join("temp1_input");
        match read_millidegrees(&path) {
            Ok(Some(millidegrees)) => return format::format_temperature(millidegrees),
            Ok(None) => continue,
            Err(e) => return format!("Error: {}", e),
        }
    }
    UNAVAILABLE.to_string()
}

fn read_millidegrees(path: &Path) -> anyhow::Result<Option<i64>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let value = text.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| anyhow!("invalid temperature reading {:?}", value))
}

fn uptime(proc_root: &Path) -> String {
    fs::read_to_string(proc_root.join("uptime"))
        .ok()
        .and_then(|text| text.split_whitespace().next()?.parse::<f64>().ok())
        .map(|secs| format::format_uptime(secs as u64))
        .unwrap_or_else(|| "Unknown".to_string())
}

/// OS release fields in file order. A repeated key keeps its first position
/// and takes the later value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionInfo(Vec<(String, String)>);

impl VersionInfo {
    pub fn insert(&mut self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn error(message: String) -> Self {
        Self(vec![("ERROR".to_string(), message)])
    }
}

impl Serialize for VersionInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

fn os_release_pattern() -> anyhow::Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = PATTERN.get() {
        return Ok(re);
    }
    let re = Regex::new(r#"^(\w+)=["']?(.*?)["']?$"#)?;
    Ok(PATTERN.get_or_init(|| re))
}

pub fn parse_os_release(text: &str) -> anyhow::Result<VersionInfo> {
    let pattern = os_release_pattern()?;
    let mut info = VersionInfo::default();
    for caps in text.lines().filter_map(|line| pattern.captures(line)) {
        info.insert(caps[1].to_string(), caps[2].to_string());
    }
    Ok(info)
}

/// Key/value pairs of the OS release file; a failure yields a single `ERROR` entry
pub fn version_info(path: &Path) -> VersionInfo {
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("Failed opening {}", path.display()))
        .and_then(|text| parse_os_release(&text));
    parsed.unwrap_or_else(|e| {
        tracing::warn!("{:#}", e);
        VersionInfo::error(format!("{:#}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const X86_CPUINFO: &str = "\
processor\t: 0
model name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz
cpu MHz\t\t: 1800.000
physical id\t: 0
core id\t\t: 0

processor\t: 1
model name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz
cpu MHz\t\t: 1700.000
physical id\t: 0
core id\t\t: 0

processor\t: 2
model name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz
physical id\t: 0
core id\t\t: 1
";

    const ARM_CPUINFO: &str = "\
processor\t: 0
BogoMIPS\t: 50.00

processor\t: 1
BogoMIPS\t: 50.00

Hardware\t: Marvell Armada 3720
";

    #[test]
    fn cpu_model_and_cores() {
        assert_eq!(
            cpu_model(X86_CPUINFO).as_deref(),
            Some("Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz")
        );
        assert_eq!(physical_cores(X86_CPUINFO), 2);

        assert_eq!(cpu_model(ARM_CPUINFO).as_deref(), Some("Marvell Armada 3720"));
        assert_eq!(physical_cores(ARM_CPUINFO), 2);
        assert_eq!(cpu_model(""), None);
    }

    #[test]
    fn meminfo_used_is_total_minus_available() {
        let meminfo = "MemTotal:        4000 kB\nMemFree:          500 kB\nMemAvailable:    1000 kB\n";
        assert_eq!(parse_meminfo(meminfo), Some((3000 * 1024, 4000 * 1024)));
        assert_eq!(parse_meminfo("MemTotal: 10 kB\nMemFree: 4 kB\n"), Some((6 * 1024, 10 * 1024)));
        assert_eq!(parse_meminfo("garbage"), None);
    }

    #[test]
    fn loadavg_is_two_decimals() {
        assert_eq!(
            parse_loadavg("0.52 1.2 10.000 2/345 6789\n"),
            Some(["0.52".to_string(), "1.20".to_string(), "10.00".to_string()])
        );
        assert_eq!(parse_loadavg("0.5"), None);
    }

    #[test]
    fn os_release_strips_quotes() {
        let info = parse_os_release(
            "NAME=\"Infix\"\nVERSION_ID=24.06\nPRETTY_NAME='Infix v24.06'\n# comment\nBROKEN LINE\n",
        )
        .unwrap();
        assert_eq!(info.get("NAME"), Some("Infix"));
        assert_eq!(info.get("VERSION_ID"), Some("24.06"));
        assert_eq!(info.get("PRETTY_NAME"), Some("Infix v24.06"));
        assert_eq!(info.iter().count(), 3);
    }

    #[test]
    fn os_release_keeps_file_order() {
        let info =
            parse_os_release("NAME=Infix\nVERSION=1.0\nID=infix\nBUILD_ID=abc\nVERSION=1.1\n").unwrap();
        let keys: Vec<&str> = info.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["NAME", "VERSION", "ID", "BUILD_ID"]);
        assert_eq!(info.get("VERSION"), Some("1.1"));

        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"NAME":"Infix","VERSION":"1.1","ID":"infix","BUILD_ID":"abc"}"#);
    }

    #[test]
    fn disk_reserve_counts_as_used() {
        let usage = disk_usage_from(1000 * 1024, 250 * 1024);
        assert_eq!(usage.percent, 75.0);
        assert_eq!(usage.formatted, "750.00 KB / 0.98 MB (75.00%)");
        assert_eq!(disk_usage_from(0, 0).percent, 0.0);
    }

    #[test]
    fn missing_os_release_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let info = version_info(&dir.path().join("os-release"));
        assert_eq!(info.iter().count(), 1);
        assert!(info.get("ERROR").is_some());
    }

    #[test]
    fn temperature_falls_back_to_hwmon0() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(cpu_temperature(root.path()), "N/A");

        let hwmon0 = root.path().join("class/hwmon/hwmon0");
        fs::create_dir_all(&hwmon0).unwrap();
        fs::write(hwmon0.join("temp1_input"), "42500\n").unwrap();
        assert_eq!(cpu_temperature(root.path()), "42.50°C");

        let hwmon1 = root.path().join("class/hwmon/hwmon1");
        fs::create_dir_all(&hwmon1).unwrap();
        fs::write(hwmon1.join("temp1_input"), "bogus\n").unwrap();
        assert!(cpu_temperature(root.path()).starts_with("Error: "));
    }

    fn fixture() -> (tempfile::TempDir, HostPaths) {
        let root = tempfile::tempdir().unwrap();
        let proc_root = root.path().join("proc");
        let sys_root = root.path().join("sys");
        fs::create_dir_all(proc_root.join("sys/kernel")).unwrap();
        fs::create_dir_all(sys_root.join("devices/virtual/dmi/id")).unwrap();
        fs::create_dir_all(sys_root.join("devices/system/cpu/cpu0/cpufreq")).unwrap();
        fs::create_dir_all(sys_root.join("class/net/lo")).unwrap();

        fs::write(proc_root.join("sys/kernel/hostname"), "gateway\n").unwrap();
        fs::write(proc_root.join("cpuinfo"), X86_CPUINFO).unwrap();
        fs::write(proc_root.join("meminfo"), "MemTotal: 2048 kB\nMemAvailable: 1024 kB\n").unwrap();
        fs::write(proc_root.join("loadavg"), "0.10 0.20 0.30 1/100 42\n").unwrap();
        fs::write(proc_root.join("uptime"), "93784.55 1000.00\n").unwrap();
        fs::write(sys_root.join("devices/virtual/dmi/id/product_family"), "Edge Router\n").unwrap();
        fs::write(sys_root.join("devices/system/cpu/cpu0/cpufreq/scaling_cur_freq"), "2400000\n")
            .unwrap();
        fs::write(sys_root.join("devices/system/cpu/cpu0/cpufreq/cpuinfo_min_freq"), "400000\n")
            .unwrap();
        fs::write(sys_root.join("class/net/lo/operstate"), "unknown\n").unwrap();

        let os_release = root.path().join("os-release");
        fs::write(&os_release, "NAME=Test\n").unwrap();

        let paths = HostPaths {
            proc_root,
            sys_root,
            os_release,
        };
        (root, paths)
    }

    #[test]
    fn collects_report_from_fixture() {
        let (_root, paths) = fixture();
        let report = collect(&paths, Duration::ZERO);

        assert_eq!(report.hostname, "gateway");
        assert_eq!(report.model, "Edge Router");
        assert_eq!(report.cpu_chipset, "Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz");
        assert_eq!(report.cpu_frequency, "2.40 GHz (dual-core)");
        assert_eq!(report.memory.formatted, "1.00 MB / 2.00 MB (50.00%)");
        assert_eq!(report.memory.percent, 50.0);
        assert_eq!(report.load_average, ["0.10", "0.20", "0.30"]);
        assert_eq!(report.uptime, "1 days 2 hours 3 mins 4 secs");
        assert_eq!(report.cpu_temperature, "N/A");
        assert_eq!(report.version_info.get("NAME"), Some("Test"));
        assert_eq!(report.interfaces.len(), 1);
        assert_eq!(report.interfaces[0].ifname, "lo");
    }

    #[test]
    fn empty_fixture_degrades_to_placeholders() {
        let root = tempfile::tempdir().unwrap();
        let paths = HostPaths {
            proc_root: root.path().join("proc"),
            sys_root: root.path().join("sys"),
            os_release: root.path().join("os-release"),
        };
        let report = collect(&paths, Duration::ZERO);

        assert_eq!(report.hostname, "Unknown");
        assert_eq!(report.model, "N/A");
        assert_eq!(report.cpu_chipset, "N/A");
        assert_eq!(report.cpu_frequency, "N/A");
        assert_eq!(report.memory.formatted, "N/A");
        assert_eq!(report.load_average, ["0.00", "0.00", "0.00"]);
        assert_eq!(report.uptime, "Unknown");
        assert!(report.version_info.get("ERROR").is_some());
        assert!(report.interfaces.is_empty());
    }
}
