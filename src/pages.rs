//! HTML pages of the dashboard, rendered from the askama templates in `templates/`

use crate::host::{StatusReport, Usage, VersionInfo};
use crate::logs::{LogView, DISPLAY_TAIL_LINES};
use crate::netinfo::{NetInterface, NetReport, Route};
use crate::upgrade::FirmwareInfo;
use askama::Template;

const NAV_ITEMS: &[(&str, &str)] = &[
    ("/", "Home"),
    ("/status", "Status"),
    ("/net", "Network"),
    ("/config", "Configuration"),
    ("/log", "Logs"),
    ("/upgrade", "Upgrade"),
];

pub struct NavLink {
    pub href: &'static str,
    pub label: &'static str,
    pub active: bool,
}

/// Data the shared layout needs on every logged-in page
pub struct BaseContext<'a> {
    pub title: &'a str,
    pub username: &'a str,
    pub nav: Vec<NavLink>,
}

impl<'a> BaseContext<'a> {
    fn new(title: &'a str, active: &str, username: &'a str) -> Self {
        let nav = NAV_ITEMS
            .iter()
            .map(|&(href, label)| NavLink {
                href,
                label,
                active: href == active,
            })
            .collect();
        Self { title, username, nav }
    }
}

fn render(template: &impl Template) -> String {
    template
        .render()
        .unwrap_or_else(|e| format!("Template error: {e}"))
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate<'a> {
    flashes: &'a [String],
}

pub fn login_page(flashes: &[String]) -> String {
    render(&LoginTemplate { flashes })
}

#[derive(Template)]
#[template(path = "main.html")]
struct MainTemplate<'a> {
    base: BaseContext<'a>,
}

pub fn main_page(username: &str) -> String {
    render(&MainTemplate {
        base: BaseContext::new("Home", "/", username),
    })
}

/// One row of the system table; usage rows also carry a bar width in percent
pub struct InfoRow {
    pub label: &'static str,
    pub value: String,
    pub bar: Option<String>,
}

impl InfoRow {
    fn text(label: &'static str, value: &str) -> Self {
        Self {
            label,
            value: value.to_string(),
            bar: None,
        }
    }

    fn usage(label: &'static str, usage: &Usage) -> Self {
        Self {
            label,
            value: usage.formatted.clone(),
            bar: Some(format!("{:.0}", usage.percent.clamp(0.0, 100.0))),
        }
    }
}

pub struct InterfaceRow {
    pub name: String,
    pub state: String,
    pub state_class: String,
    pub mac: String,
    pub mtu: String,
    pub addresses: Vec<String>,
}

fn interface_rows(interfaces: &[NetInterface]) -> Vec<InterfaceRow> {
    interfaces
        .iter()
        .map(|iface| InterfaceRow {
            name: iface.ifname.clone(),
            state: iface.operstate.clone(),
            state_class: iface.operstate.to_lowercase(),
            mac: iface.address.clone().unwrap_or_default(),
            mtu: iface.mtu.map(|m| m.to_string()).unwrap_or_default(),
            addresses: iface
                .addr_info
                .iter()
                .map(|a| format!("{}/{}", a.local, a.prefixlen))
                .collect(),
        })
        .collect()
}

fn version_rows(info: &VersionInfo) -> Vec<(&str, &str)> {
    info.iter().collect()
}

#[derive(Template)]
#[template(path = "status.html")]
struct StatusTemplate<'a> {
    base: BaseContext<'a>,
    system: Vec<InfoRow>,
    version: Vec<(&'a str, &'a str)>,
    interfaces: Vec<InterfaceRow>,
}

pub fn status_page(username: &str, report: &StatusReport) -> String {
    let system = vec![
        InfoRow::text("Hostname", &report.hostname),
        InfoRow::text("Model", &report.model),
        InfoRow::text("CPU", &report.cpu_chipset),
        InfoRow::text("CPU frequency", &report.cpu_frequency),
        InfoRow::text("CPU usage", &format!("{:.1}%", report.cpu_usage)),
        InfoRow::text("Load average (1/5/15)", &report.load_average.join(" / ")),
        InfoRow::text("CPU temperature", &report.cpu_temperature),
        InfoRow::usage("Memory", &report.memory),
        InfoRow::usage("Disk", &report.disk),
        InfoRow::text("Current time", &report.current_time),
        InfoRow::text("Uptime", &report.uptime),
    ];
    render(&StatusTemplate {
        base: BaseContext::new("Status", "/status", username),
        system,
        version: version_rows(&report.version_info),
        interfaces: interface_rows(&report.interfaces),
    })
}

pub struct RouteTable<'a> {
    pub title: &'static str,
    pub routes: Vec<&'a Route>,
}

#[derive(Template)]
#[template(path = "net.html")]
struct NetTemplate<'a> {
    base: BaseContext<'a>,
    interfaces: Vec<InterfaceRow>,
    route_tables: Vec<RouteTable<'a>>,
}

pub fn net_page(username: &str, report: &NetReport) -> String {
    render(&NetTemplate {
        base: BaseContext::new("Network", "/net", username),
        interfaces: interface_rows(&report.interfaces),
        route_tables: vec![
            RouteTable {
                title: "IPv4 routes",
                routes: report.routes4.iter().collect(),
            },
            RouteTable {
                title: "IPv6 routes",
                routes: report.routes6.iter().collect(),
            },
        ],
    })
}

#[derive(Template)]
#[template(path = "config.html")]
struct ConfigTemplate<'a> {
    base: BaseContext<'a>,
}

pub fn config_page(username: &str) -> String {
    render(&ConfigTemplate {
        base: BaseContext::new("Configuration", "/config", username),
    })
}

pub struct LogLink<'a> {
    pub name: &'a str,
    pub active: bool,
}

pub struct SelectedLog<'a> {
    pub name: &'a str,
    pub content: &'a str,
    pub truncated: bool,
}

#[derive(Template)]
#[template(path = "log.html")]
struct LogTemplate<'a> {
    base: BaseContext<'a>,
    files: Vec<LogLink<'a>>,
    selected: Option<SelectedLog<'a>>,
    tail_lines: usize,
}

pub fn log_page(username: &str, files: &[String], selected: Option<(&str, &LogView)>) -> String {
    let current = selected.map(|(name, _)| name);
    let files = files
        .iter()
        .map(|name| LogLink {
            name: name.as_str(),
            active: current == Some(name.as_str()),
        })
        .collect();
    render(&LogTemplate {
        base: BaseContext::new("Logs", "/log", username),
        files,
        selected: selected.map(|(name, view)| SelectedLog {
            name,
            content: &view.content,
            truncated: view.truncated,
        }),
        tail_lines: DISPLAY_TAIL_LINES,
    })
}

#[derive(Template)]
#[template(path = "upgrade.html")]
struct UpgradeTemplate<'a> {
    base: BaseContext<'a>,
    firmware: &'a FirmwareInfo,
    version: Vec<(&'a str, &'a str)>,
}

pub fn upgrade_page(username: &str, version_info: &VersionInfo, firmware: &FirmwareInfo) -> String {
    render(&UpgradeTemplate {
        base: BaseContext::new("Upgrade", "/upgrade", username),
        firmware,
        version: version_rows(version_info),
    })
}

#[derive(Template)]
#[template(path = "progress.html")]
struct ProgressTemplate<'a> {
    base: BaseContext<'a>,
}

pub fn progress_page(username: &str) -> String {
    render(&ProgressTemplate {
        base: BaseContext::new("Upgrade progress", "/upgrade", username),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::parse_os_release;

    #[test]
    fn login_page_escapes_flashes() {
        let html = login_page(&["Login failed! <b>".to_string()]);
        assert!(html.contains("Login failed! &lt;b&gt;"));
        assert!(!html.contains("<b>"));

        let html = login_page(&[]);
        assert!(html.contains(r#"action="/login""#));
        assert!(!html.contains(r#"<div class="error">"#));
    }

    #[test]
    fn layout_marks_active_entry() {
        let html = config_page("admin");
        assert!(html.contains(r#"<a href="/config" class="active">Configuration</a>"#));
        assert!(html.contains(r#"<a href="/status">Status</a>"#));
        assert!(html.contains("/keepalive"));
        assert!(html.contains(r#"href="/config/download""#));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn username_is_escaped() {
        let html = main_page("<img src=x>");
        assert!(html.contains("Welcome, &lt;img src=x&gt;"));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn log_page_escapes_content() {
        let view = LogView {
            content: "<script>alert(1)</script>".to_string(),
            truncated: true,
        };
        let files = vec!["syslog".to_string()];
        let html = log_page("admin", &files, Some(("syslog", &view)));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;"));
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("last 1000 lines"));
        assert!(html.contains(r#"href="/log?file=syslog" class="active""#));
    }

    #[test]
    fn log_links_are_percent_encoded() {
        let files = vec!["a b&c#1.log".to_string(), "50%+.log".to_string()];
        let html = log_page("admin", &files, None);
        assert!(html.contains(r#"href="/log?file=a%20b%26c%231.log""#));
        assert!(html.contains(r#"href="/logs/a%20b%26c%231.log""#));
        assert!(html.contains(r#"href="/log?file=50%25%2B.log""#));
        assert!(html.contains(">a b&amp;c#1.log</a>"));
    }

    #[test]
    fn version_rows_follow_file_order() {
        let info = parse_os_release("NAME=Infix\nVERSION=1.0\nID=infix\nBUILD_ID=abc\n").unwrap();
        let html = upgrade_page("admin", &info, &FirmwareInfo::default());
        let positions: Vec<usize> = ["<th>NAME</th>", "<th>VERSION</th>", "<th>ID</th>", "<th>BUILD_ID</th>"]
            .iter()
            .map(|key| html.find(key).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(html.contains("<th>Active boot slot</th><td>Unknown</td>"));
    }

    #[test]
    fn progress_page_posts_reboot() {
        let html = progress_page("admin");
        assert!(html.contains("fetch('/reboot', { method: 'POST' })"));
        assert!(html.contains(r#"<button id="reboot""#));
    }

    #[test]
    fn net_page_lists_routes() {
        let report = NetReport {
            interfaces: Vec::new(),
            routes4: vec![Route {
                dst: "default".to_string(),
                gateway: "192.168.1.1".to_string(),
                dev: "eth0".to_string(),
                metric: 100,
            }],
            routes6: Vec::new(),
        };
        let html = net_page("admin", &report);
        assert!(html.contains("<td>default</td><td>192.168.1.1</td><td>eth0</td><td>100</td>"));
        assert!(html.contains("No routes"));
    }
}
