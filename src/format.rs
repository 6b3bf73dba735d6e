//! Human-readable formatting of host measurements

/// Placeholder shown when a value could not be read
pub const UNAVAILABLE: &str = "N/A";

/// Format a byte count using the largest unit whose value stays below 1000.
///
/// Units are scaled by 1024 but promoted at 1000, so 1000 KiB renders as
/// `0.98 MB`. Existing displays depend on this, keep it.
pub fn format_size(bytes: u64) -> String {
    let kilobytes = bytes as f64 / 1024.0;
    let megabytes = kilobytes / 1024.0;
    let gigabytes = megabytes / 1024.0;
    let terabytes = gigabytes / 1024.0;

    if gigabytes >= 1000.0 {
        format!("{:.2} TB", terabytes)
    } else if megabytes >= 1000.0 {
        format!("{:.2} GB", gigabytes)
    } else if kilobytes >= 1000.0 {
        format!("{:.2} MB", megabytes)
    } else if kilobytes >= 1.0 {
        format!("{:.2} KB", kilobytes)
    } else {
        format!("{} B", bytes)
    }
}

/// Name a physical core count the way datasheets do
pub fn translate_cores(cores: usize) -> String {
    match cores {
        1 => "single-core".to_string(),
        2 => "dual-core".to_string(),
        4 => "quad-core".to_string(),
        8 => "octa-core".to_string(),
        16 => "hexa-core".to_string(),
        32 => "deca-core".to_string(),
        64 => "dodeca-core".to_string(),
        n => format!("{}-core", n),
    }
}

/// Format the current CPU frequency (MHz) together with the core name.
///
/// Some boards report the current value already in GHz, which shows up as a
/// reading below the advertised minimum.
pub fn format_frequency(current_mhz: f64, min_mhz: Option<f64>, cores: usize) -> String {
    let cores = translate_cores(cores);
    if current_mhz > 1000.0 {
        format!("{:.2} GHz ({})", current_mhz / 1000.0, cores)
    } else if min_mhz.is_some_and(|min| current_mhz < min) {
        format!("{:.2} GHz ({})", current_mhz, cores)
    } else {
        format!("{:.2} MHz ({})", current_mhz, cores)
    }
}

/// Format a hwmon reading given in millidegrees Celsius
pub fn format_temperature(millidegrees: i64) -> String {
    format!("{:.2}°C", millidegrees as f64 / 1000.0)
}

pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{} days {} hours {} mins {} secs", days, hours, minutes, seconds)
}

/// Usage line shown for memory and disk, e.g. `1.00 GB / 4.00 GB (25.00%)`
pub fn format_usage(used: u64, total: u64, percent: f64) -> String {
    format!("{} / {} ({:.2}%)", format_size(used), format_size(total), percent)
}
