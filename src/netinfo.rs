//! Network interfaces and routing tables, read from sysfs and procfs

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use sysinfo::Networks;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AddrInfo {
    pub family: String,
    pub local: String,
    pub prefixlen: u8,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NetInterface {
    pub ifname: String,
    pub operstate: String,
    pub address: Option<String>,
    pub mtu: Option<u32>,
    pub addr_info: Vec<AddrInfo>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Route {
    pub dst: String,
    pub gateway: String,
    pub dev: String,
    pub metric: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct NetReport {
    pub interfaces: Vec<NetInterface>,
    pub routes4: Vec<Route>,
    pub routes6: Vec<Route>,
}

/// One run of an interface name: text and digits alternate, starting with text
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Number(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Number(a), Segment::Number(b)) => {
                let a = a.trim_start_matches('0');
                let b = b.trim_start_matches('0');
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            // runs alternate from a common text start, so these never meet in practice
            (Segment::Text(_), Segment::Number(_)) => Ordering::Greater,
            (Segment::Number(_), Segment::Text(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key placing the loopback interface first and the rest in natural order
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterfaceKey {
    Loopback,
    Named(Vec<Segment>),
}

pub fn interface_sort_key(ifname: &str) -> InterfaceKey {
    if ifname == "lo" {
        return InterfaceKey::Loopback;
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;
    for c in ifname.chars() {
        if c.is_ascii_digit() != in_digits {
            segments.push(close_segment(std::mem::take(&mut current), in_digits));
            in_digits = !in_digits;
        }
        current.push(c.to_ascii_lowercase());
    }
    segments.push(close_segment(current, in_digits));
    if in_digits {
        segments.push(Segment::Text(String::new()));
    }
    InterfaceKey::Named(segments)
}

fn close_segment(run: String, digits: bool) -> Segment {
    if digits {
        Segment::Number(run)
    } else {
        Segment::Text(run)
    }
}

/// Stable sort: `lo` first, then natural order of the remaining names
pub fn sort_interfaces(interfaces: &mut [NetInterface]) {
    interfaces.sort_by_cached_key(|iface| interface_sort_key(&iface.ifname));
}

/// List interfaces from `{sys_root}/class/net`, with addresses from the kernel
pub fn list_interfaces(sys_root: &Path) -> anyhow::Result<Vec<NetInterface>> {
    let class_net = sys_root.join("class/net");
    let addresses = interface_addresses();

    let mut interfaces = Vec::new();
    for entry in fs::read_dir(&class_net)? {
        let entry = entry?;
        let ifname = entry.file_name().to_string_lossy().to_string();
        let dir = entry.path();

        let operstate = read_trimmed(&dir.join("operstate"))
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let address = read_trimmed(&dir.join("address")).filter(|s| !s.is_empty());
        let mtu = read_trimmed(&dir.join("mtu")).and_then(|s| s.parse().ok());
        let addr_info = addresses.get(&ifname).cloned().unwrap_or_default();

        interfaces.push(NetInterface {
            ifname,
            operstate,
            address,
            mtu,
            addr_info,
        });
    }

    sort_interfaces(&mut interfaces);
    Ok(interfaces)
}

fn interface_addresses() -> HashMap<String, Vec<AddrInfo>> {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .map(|(name, data)| {
            let addrs = data
                .ip_networks()
                .iter()
                .map(|net| AddrInfo {
                    family: match net.addr {
                        IpAddr::V4(_) => "inet".to_string(),
                        IpAddr::V6(_) => "inet6".to_string(),
                    },
                    local: net.addr.to_string(),
                    prefixlen: net.prefix,
                })
                .collect();
            (name.clone(), addrs)
        })
        .collect()
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

const RTF_UP: u32 = 0x0001;
const RTF_REJECT: u32 = 0x0200;
const RTF_LOCAL: u32 = 0x8000_0000;

/// Parse `/proc/net/route`. Addresses are little-endian hex words.
pub fn parse_ipv4_routes(content: &str) -> Vec<Route> {
    let mut routes: Vec<Route> = content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return None;
            }
            let flags = u32::from_str_radix(fields[3], 16).ok()?;
            if flags & RTF_UP == 0 {
                return None;
            }
            let dst = hex_ipv4(fields[1])?;
            let gateway = hex_ipv4(fields[2])?;
            let mask = hex_ipv4(fields[7])?;
            let prefix = u32::from(mask).count_ones();

            Some(Route {
                dst: if prefix == 0 && dst.is_unspecified() {
                    "default".to_string()
                } else if prefix == 32 {
                    dst.to_string()
                } else {
                    format!("{}/{}", dst, prefix)
                },
                gateway: gateway.to_string(),
                dev: fields[0].to_string(),
                metric: fields[6].parse().unwrap_or(0),
            })
        })
        .collect();

    sort_routes(&mut routes);
    routes
}

fn hex_ipv4(word: &str) -> Option<Ipv4Addr> {
    let value = u32::from_str_radix(word, 16).ok()?;
    Some(Ipv4Addr::from(value.to_le_bytes()))
}

/// Parse `/proc/net/ipv6_route`, skipping reject and local-table entries
pub fn parse_ipv6_routes(content: &str) -> Vec<Route> {
    let mut routes: Vec<Route> = content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let flags = u32::from_str_radix(fields[8], 16).ok()?;
            if flags & RTF_UP == 0 || flags & (RTF_REJECT | RTF_LOCAL) != 0 {
                return None;
            }
            let dst = hex_ipv6(fields[0])?;
            let prefix = u8::from_str_radix(fields[1], 16).ok()?;
            let gateway = hex_ipv6(fields[4])?;

            Some(Route {
                dst: if prefix == 0 && dst.is_unspecified() {
                    "default".to_string()
                } else if prefix == 128 {
                    dst.to_string()
                } else {
                    format!("{}/{}", dst, prefix)
                },
                gateway: gateway.to_string(),
                dev: fields[9].to_string(),
                metric: u32::from_str_radix(fields[5], 16).unwrap_or(0),
            })
        })
        .collect();

    sort_routes(&mut routes);
    routes
}

fn hex_ipv6(word: &str) -> Option<Ipv6Addr> {
    if word.len() != 32 {
        return None;
    }
    let mut octets = [0u8; 16];
    for (i, octet) in octets.iter_mut().enumerate() {
        *octet = u8::from_str_radix(word.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(Ipv6Addr::from(octets))
}

/// Default routes first, then by destination
fn sort_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| {
        let a_default = a.dst == "default";
        let b_default = b.dst == "default";
        b_default
            .cmp(&a_default)
            .then_with(|| a.dst.cmp(&b.dst))
            .then_with(|| a.metric.cmp(&b.metric))
    });
}

pub fn read_routes(proc_root: &Path) -> (Vec<Route>, Vec<Route>) {
    let routes4 = fs::read_to_string(proc_root.join("net/route"))
        .map(|s| parse_ipv4_routes(&s))
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to read IPv4 routes: {}", e);
            Vec::new()
        });
    let routes6 = fs::read_to_string(proc_root.join("net/ipv6_route"))
        .map(|s| parse_ipv6_routes(&s))
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to read IPv6 routes: {}", e);
            Vec::new()
        });
    (routes4, routes6)
}

pub fn collect(sys_root: &Path, proc_root: &Path) -> anyhow::Result<NetReport> {
    let interfaces = list_interfaces(sys_root)?;
    let (routes4, routes6) = read_routes(proc_root);
    Ok(NetReport {
        interfaces,
        routes4,
        routes6,
    })
}
