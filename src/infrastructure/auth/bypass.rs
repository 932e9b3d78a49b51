//! Source-IP allow-list that lets trusted networks (the slave fleet's own
//! subnet, typically) skip Digest auth entirely.

use std::net::IpAddr;

use ipnet::IpNet;

#[derive(Debug, Clone, Default)]
pub struct BypassList {
    ranges: Vec<IpNet>,
}

impl BypassList {
    pub fn parse(cidrs: &[String]) -> Result<Self, ipnet::AddrParseError> {
        let ranges = cidrs.iter().map(|c| c.parse()).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }

    pub fn allows(&self, addr: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_inside_configured_range_bypasses_auth() {
        let list = BypassList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        assert!(list.allows("10.1.2.3".parse().unwrap()));
        assert!(!list.allows("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn empty_list_allows_nothing() {
        let list = BypassList::default();
        assert!(!list.allows("127.0.0.1".parse().unwrap()));
    }
}
