use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Routing class of a textual address.
///
/// Only [`IpClass::Public`] addresses take part in double-login detection;
/// everything else is treated as NAT/DHCP churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpClass {
    Public,
    Private,
    Loopback,
    Invalid,
}

impl IpClass {
    pub fn is_public(self) -> bool {
        self == IpClass::Public
    }
}

/// Classify an IPv4 or IPv6 address string. Never fails: anything that does not
/// parse is [`IpClass::Invalid`].
pub fn classify(address: &str) -> IpClass {
    match address.parse::<IpAddr>() {
        Ok(ip) => classify_addr(ip),
        Err(_) => IpClass::Invalid,
    }
}

pub fn classify_addr(ip: IpAddr) -> IpClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => classify_v4(v4),
            None => classify_v6(v6),
        },
    }
}

pub fn is_public(address: &str) -> bool {
    classify(address).is_public()
}

fn classify_v4(ip: Ipv4Addr) -> IpClass {
    if ip.is_loopback() {
        return IpClass::Loopback;
    }
    let [a, b, _, _] = ip.octets();
    let reserved = ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || a == 0                              // 0.0.0.0/8 "this network"
        || (a == 198 && (b & 0xfe) == 18)      // 198.18.0.0/15 benchmarking
        || a >= 240                            // 240.0.0.0/4 reserved
        || (a == 192 && b == 0 && ip.octets()[2] == 0); // 192.0.0.0/24 IETF assignments
    if reserved {
        IpClass::Private
    } else {
        IpClass::Public
    }
}

fn classify_v6(ip: Ipv6Addr) -> IpClass {
    if ip.is_loopback() {
        return IpClass::Loopback;
    }
    let first = ip.segments()[0];
    let second = ip.segments()[1];
    let reserved = ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00               // fc00::/7 unique local
        || (first & 0xffc0) == 0xfe80               // fe80::/10 link local
        || (first == 0x2001 && second == 0x0db8)    // 2001:db8::/32 documentation
        || (first == 0x0100 && ip.segments()[1..4] == [0u16, 0, 0]) // 100::/64 discard
        || (first == 0x2001 && second < 0x0200);    // 2001::/23 IETF protocol assignments
    if reserved {
        IpClass::Private
    } else {
        IpClass::Public
    }
}
