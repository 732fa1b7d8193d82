use portsweep::ports::{parse_port_file, parse_port_spec};
use portsweep::ScanError;

#[test]
fn parse_singles_and_ranges_in_order() {
    let ports = parse_port_spec("22,80,7000-7002").expect("parse ok");
    assert_eq!(ports, vec![22, 80, 7000, 7001, 7002]);
}

#[test]
fn out_of_range_rejected() {
    assert!(parse_port_spec("70000").is_err());
    assert!(parse_port_spec("0-10").is_err());
}

#[test]
fn port_file_accepts_lines_and_comments() {
    let path = std::env::temp_dir().join(format!("portsweep-ports-{}.txt", std::process::id()));
    std::fs::write(
        &path,
        "# web\n80,443  # https\n\n8000-8002\n8001\n",
    )
    .unwrap();

    let ports = parse_port_file(&path).expect("parse ok");
    assert_eq!(ports, vec![80, 443, 8000, 8001, 8002]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_port_file_is_file_access_error() {
    let err = parse_port_file("/definitely/not/here/ports.txt").unwrap_err();
    assert!(matches!(err, ScanError::FileAccess { .. }));
}
