use std::net::{IpAddr, Ipv4Addr};

use portsweep::targets::{parse_ip_file, parse_ip_spec};
use portsweep::ScanError;

#[test]
fn network_excludes_network_and_broadcast() {
    let ips = parse_ip_spec("10.0.0.0/30").unwrap();
    assert_eq!(
        ips,
        vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ]
    );
}

#[test]
fn slash_24_has_254_hosts() {
    let ips = parse_ip_spec("192.168.7.0/24").unwrap();
    assert_eq!(ips.len(), 254);
    assert_eq!(ips[0], IpAddr::V4(Ipv4Addr::new(192, 168, 7, 1)));
    assert_eq!(ips[253], IpAddr::V4(Ipv4Addr::new(192, 168, 7, 254)));
}

#[test]
fn host_file_one_token_per_line() {
    let path = std::env::temp_dir().join(format!("portsweep-hosts-{}.txt", std::process::id()));
    std::fs::write(&path, "# lab\n127.0.0.1\n\n10.1.1.0/31\n").unwrap();

    let ips = parse_ip_file(&path).unwrap();
    assert_eq!(
        ips,
        vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 1, 1, 0)),
            IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)),
        ]
    );
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn bad_line_in_host_file_reports_line_number() {
    let path = std::env::temp_dir().join(format!("portsweep-badhosts-{}.txt", std::process::id()));
    std::fs::write(&path, "127.0.0.1\nnot-an-ip\n").unwrap();

    match parse_ip_file(&path) {
        Err(ScanError::MalformedHostSpec(msg)) => assert!(msg.starts_with("line 2")),
        other => panic!("unexpected: {other:?}"),
    }
    std::fs::remove_file(&path).unwrap();
}
