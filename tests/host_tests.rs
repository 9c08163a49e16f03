//! Host Tests
//!
//! Tests for host address parsing and formatting.

use meshkv_client::Host;

// =============================================================================
// Parsing Tests
// =============================================================================

#[test]
fn test_parse_hostname_port() {
    let host = Host::parse("db1.example.com:3000").unwrap();
    assert_eq!(host.name, "db1.example.com");
    assert_eq!(host.port, 3000);
    assert_eq!(host.tls_name, None);
}

#[test]
fn test_parse_ipv4_port() {
    let host = Host::parse("10.0.0.5:3100").unwrap();
    assert_eq!(host.name, "10.0.0.5");
    assert_eq!(host.port, 3100);
}

#[test]
fn test_parse_ipv6_bracketed() {
    let host = Host::parse("[::1]:3000").unwrap();
    assert_eq!(host.name, "::1");
    assert_eq!(host.port, 3000);

    let host = Host::parse("[2001:db8::42]:3000").unwrap();
    assert_eq!(host.name, "2001:db8::42");
    assert_eq!(host.port, 3000);
}

#[test]
fn test_parse_trims_whitespace() {
    let host = Host::parse("  localhost:3000 ").unwrap();
    assert_eq!(host.name, "localhost");
    assert_eq!(host.port, 3000);
}

// =============================================================================
// Rejection Tests
// =============================================================================

#[test]
fn test_parse_missing_port() {
    assert!(Host::parse("localhost").is_err());
    assert!(Host::parse("[::1]").is_err());
}

#[test]
fn test_parse_empty_port() {
    assert!(Host::parse("localhost:").is_err());
}

#[test]
fn test_parse_bad_port() {
    assert!(Host::parse("localhost:abc").is_err());
    assert!(Host::parse("localhost:70000").is_err());
}

#[test]
fn test_parse_unterminated_bracket() {
    assert!(Host::parse("[::1:3000").is_err());
}

#[test]
fn test_parse_empty_name() {
    assert!(Host::parse(":3000").is_err());
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_format_round_trip() {
    for input in ["localhost:3000", "10.1.2.3:3100", "[::1]:3000"] {
        let host = Host::parse(input).unwrap();
        let reparsed = Host::parse(&host.to_string()).unwrap();
        assert_eq!(host, reparsed);
        assert_eq!(host.to_string(), input);
    }
}

// =============================================================================
// List Tests
// =============================================================================

#[test]
fn test_parse_list() {
    let hosts = Host::parse_list("a.example.com:3000,b.example.com:3001,[::1]:3002").unwrap();
    assert_eq!(hosts.len(), 3);
    assert_eq!(hosts[0].name, "a.example.com");
    assert_eq!(hosts[1].port, 3001);
    assert_eq!(hosts[2].name, "::1");
}

#[test]
fn test_parse_list_skips_empty_entries() {
    let hosts = Host::parse_list("a:1,,b:2,").unwrap();
    assert_eq!(hosts.len(), 2);
}

#[test]
fn test_parse_list_propagates_errors() {
    assert!(Host::parse_list("a:1,borked").is_err());
}
