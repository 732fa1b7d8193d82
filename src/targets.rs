use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::{Result, ScanError};

/// Largest network (in addresses) a single token may expand to.
pub const MAX_NETWORK_ADDRESSES: u128 = 1 << 24;

/// Parse a comma-separated host spec into a list of addresses.
///
/// Each token is a single address (`10.0.0.7`) or a network (`10.0.0.0/24`).
/// Host bits in a network token are ignored, so `10.0.0.9/30` is the same as
/// `10.0.0.8/30`. Blank tokens are skipped.
pub fn parse_ip_spec(s: &str) -> Result<Vec<IpAddr>> {
    let mut out = Vec::new();
    for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        push_token(token, &mut out)?;
    }
    Ok(out)
}

/// Load hosts from a file holding one address or network per line.
/// Blank lines and `#` comments are ignored.
pub fn parse_ip_file(path: impl AsRef<Path>) -> Result<Vec<IpAddr>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ScanError::FileAccess {
        path: path.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        push_token(line, &mut out).map_err(|e| match e {
            ScanError::MalformedHostSpec(msg) => {
                ScanError::MalformedHostSpec(format!("line {}: {msg}", idx + 1))
            }
            other => other,
        })?;
    }
    Ok(out)
}

fn push_token(token: &str, out: &mut Vec<IpAddr>) -> Result<()> {
    if let Ok(ip) = token.parse::<IpAddr>() {
        out.push(ip);
        return Ok(());
    }
    let net = token
        .parse::<IpNet>()
        .map_err(|_| ScanError::MalformedHostSpec(token.to_string()))?;
    out.extend(expand_cidr_to_ips(net)?);
    Ok(())
}

/// Expand a network into its usable host addresses.
///
/// The network and broadcast addresses are excluded, except for /31, /32
/// (and /127, /128) where every address is a host.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Result<Vec<IpAddr>> {
    match cidr {
        IpNet::V4(n4) => Ok(expand_ipv4net_hosts(n4)?
            .into_iter()
            .map(IpAddr::V4)
            .collect()),
        IpNet::V6(n6) => Ok(expand_ipv6net_hosts(n6)?
            .into_iter()
            .map(IpAddr::V6)
            .collect()),
    }
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Result<Vec<Ipv4Addr>> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    check_size(net.into(), u128::from(end - start) + 1)?;
    if net.prefix_len() >= 31 {
        return Ok((start..=end).map(Ipv4Addr::from).collect());
    }
    Ok((start + 1..end).map(Ipv4Addr::from).collect())
}

fn expand_ipv6net_hosts(net: Ipv6Net) -> Result<Vec<Ipv6Addr>> {
    let start = u128::from(net.network());
    let end = u128::from(net.broadcast());
    check_size(net.into(), (end - start).saturating_add(1))?;
    if net.prefix_len() >= 127 {
        return Ok((start..=end).map(Ipv6Addr::from).collect());
    }
    // IPv6 has no broadcast; only the subnet-router anycast address is skipped
    Ok((start + 1..=end).map(Ipv6Addr::from).collect())
}

fn check_size(net: IpNet, addresses: u128) -> Result<()> {
    if addresses > MAX_NETWORK_ADDRESSES {
        return Err(ScanError::MalformedHostSpec(format!(
            "{net} spans {addresses} addresses (limit {MAX_NETWORK_ADDRESSES})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_addresses_and_networks() {
        let ips = parse_ip_spec("192.168.1.7, 10.0.0.0/30").unwrap();
        assert_eq!(
            ips,
            vec![
                "192.168.1.7".parse::<IpAddr>().unwrap(),
                "10.0.0.1".parse().unwrap(),
                "10.0.0.2".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn host_bits_are_ignored() {
        let ips = parse_ip_spec("10.0.0.9/30").unwrap();
        assert_eq!(
            ips,
            vec![
                "10.0.0.9".parse::<IpAddr>().unwrap(),
                "10.0.0.10".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn tiny_networks_keep_every_address() {
        assert_eq!(parse_ip_spec("10.0.0.4/32").unwrap().len(), 1);
        assert_eq!(parse_ip_spec("10.0.0.4/31").unwrap().len(), 2);
        assert_eq!(parse_ip_spec("fe80::/127").unwrap().len(), 2);
    }

    #[test]
    fn ipv6_network_skips_anycast() {
        let ips = parse_ip_spec("2001:db8::/126").unwrap();
        assert_eq!(
            ips,
            vec![
                "2001:db8::1".parse::<IpAddr>().unwrap(),
                "2001:db8::2".parse().unwrap(),
                "2001:db8::3".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn malformed_tokens_error() {
        assert!(matches!(
            parse_ip_spec("10.0.0.300"),
            Err(ScanError::MalformedHostSpec(_))
        ));
        assert!(parse_ip_spec("10.0.0.0/33").is_err());
        assert!(parse_ip_spec("example.com").is_err());
    }

    #[test]
    fn oversized_network_rejected() {
        assert!(parse_ip_spec("2001:db8::/64").is_err());
        assert!(parse_ip_spec("10.0.0.0/7").is_err());
        assert_eq!(parse_ip_spec("10.0.0.0/16").unwrap().len(), 65534);
    }
}
