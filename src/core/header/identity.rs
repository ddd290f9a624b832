//! `identity` header section: host name, interface addresses and the
//! hardware identification exposed by DMI or the device tree.

use std::{
    net::{IpAddr, SocketAddrV4, SocketAddrV6},
    path::PathBuf,
};

use nix::{ifaddrs::getifaddrs, net::if_::InterfaceFlags, unistd::gethostname};

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const DMI_DIR: &str = "/sys/devices/virtual/dmi/id";
const DEVICE_TREE_DIR: &str = "/proc/device-tree";

/// Files read from the DMI directory on x86 hosts: (file, field).
const DMI_FILES: &[(&str, &str)] = &[
    ("product_serial", "serial-number"),
    ("product_name", "model"),
    ("sys_vendor", "vendor"),
];

/// Files read from the device tree on POWER and ARM hosts: (file, field).
const DEVICE_TREE_FILES: &[(&str, &str)] = &[
    ("compatible", "compatible"),
    ("model", "model"),
    ("part-number", "part-number"),
    ("serial-number", "serial-number"),
    ("system-id", "system-id"),
    ("vendor", "vendor"),
];

/// An address assigned to a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub interface: String,
    pub ip: IpAddr,
}

pub struct IdentityProducer {
    dmi_dir: PathBuf,
    device_tree_dir: PathBuf,
}

impl Default for IdentityProducer {
    fn default() -> Self {
        Self::with_dirs(DMI_DIR, DEVICE_TREE_DIR)
    }
}

impl IdentityProducer {
    pub fn with_dirs(dmi_dir: impl Into<PathBuf>, device_tree_dir: impl Into<PathBuf>) -> Self {
        Self {
            dmi_dir: dmi_dir.into(),
            device_tree_dir: device_tree_dir.into(),
        }
    }

    async fn read_hardware(&self, fields: &mut HeaderFields) {
        for (dir, files) in [
            (&self.device_tree_dir, DEVICE_TREE_FILES),
            (&self.dmi_dir, DMI_FILES),
        ] {
            for (file, name) in files {
                // Device tree strings are NUL terminated.
                if let Ok(content) = tokio::fs::read_to_string(dir.join(file)).await {
                    let value = content.lines().next().unwrap_or("").trim_end_matches('\0');
                    if !value.is_empty() {
                        fields.push_str(name, value);
                    }
                }
            }
        }
    }
}

/// Non-loopback IPv4 and IPv6 interface addresses, in kernel order.
pub fn interface_addresses() -> HeaderResult<Vec<InterfaceAddress>> {
    let addrs = getifaddrs().map_err(|e| HeaderError::SystemCall {
        syscall: "getifaddrs".to_string(),
        reason: e.to_string(),
    })?;

    let mut out = Vec::new();
    for ifaddr in addrs {
        if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK) {
            continue;
        }
        let Some(address) = ifaddr.address else {
            continue;
        };
        let ip = if let Some(sin) = address.as_sockaddr_in() {
            IpAddr::V4(*SocketAddrV4::from(*sin).ip())
        } else if let Some(sin6) = address.as_sockaddr_in6() {
            IpAddr::V6(*SocketAddrV6::from(*sin6).ip())
        } else {
            continue;
        };
        out.push(InterfaceAddress {
            interface: ifaddr.interface_name,
            ip,
        });
    }
    Ok(out)
}

/// Host name and address fields of the identity section.
pub fn identity_fields(hostname: &str, addresses: &[InterfaceAddress]) -> HeaderFields {
    let mut fields = HeaderFields::new();
    fields.push_str("hostname", hostname);
    fields.push_str(
        "shorthostname",
        hostname.split('.').next().unwrap_or(hostname),
    );

    for addr in addresses {
        let suffix = if addr.ip.is_ipv4() { "IP4" } else { "IP6" };
        fields.push_str(&format!("{}_{}", addr.interface, suffix), addr.ip.to_string());
    }

    if !addresses.is_empty() {
        let all: Vec<String> = addresses.iter().map(|a| a.ip.to_string()).collect();
        fields.push_str("all_ip_addresses", all.join(","));
    }
    fields
}

#[async_trait::async_trait]
impl HeaderProducer for IdentityProducer {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let hostname = gethostname()
            .map_err(|e| HeaderError::SystemCall {
                syscall: "gethostname".to_string(),
                reason: e.to_string(),
            })?
            .to_string_lossy()
            .into_owned();

        let addresses = interface_addresses().unwrap_or_else(|e| {
            tracing::debug!("No interface addresses in identity section: {}", e);
            Vec::new()
        });

        let mut fields = identity_fields(&hostname, &addresses);
        self.read_hardware(&mut fields).await;

        Ok(HeaderRecord::fields("identity", fields))
    }
}
