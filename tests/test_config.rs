use homeport_httpd::config::{Config, PORT_ENV, TIMEOUT_ENV};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.address, None);
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.server.timeout_secs, 15);
    assert_eq!(cfg.server.timeout(), Some(Duration::from_secs(15)));
    assert_eq!(cfg.server.max_read_size, 1024);
    assert_eq!(cfg.server.max_header_size, 80 * 1024);
    assert_eq!(cfg.log_level, "info");
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml(
        "server:\n  address: 127.0.0.1\n  port: 3000\n  timeout_secs: 5\nlog_level: debug\n",
    )
    .unwrap();

    assert_eq!(cfg.server.address, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert_eq!(cfg.server.port, 3000);
    assert_eq!(cfg.server.timeout(), Some(Duration::from_secs(5)));
    // Unset keys keep their defaults
    assert_eq!(cfg.server.max_read_size, 1024);
    assert_eq!(cfg.log_level, "debug");
}

#[test]
fn test_config_zero_timeout_disables() {
    let cfg = Config::from_yaml("server:\n  timeout_secs: 0\n").unwrap();
    assert_eq!(cfg.server.timeout(), None);
}

#[test]
fn test_config_rejects_bad_values() {
    assert!(Config::from_yaml("server:\n  port: 70000\n").is_err());
    assert!(Config::from_yaml("server:\n  max_read_size: 0\n").is_err());
    assert!(Config::from_yaml("server:\n  address: not-an-ip\n").is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.port, cfg2.server.port);
}

// The only test that touches the process environment.
#[test]
fn test_config_env_overrides() {
    unsafe {
        std::env::set_var(PORT_ENV, "9090");
        std::env::set_var(TIMEOUT_ENV, "30");
    }
    let cfg = Config::load();
    unsafe {
        std::env::set_var(PORT_ENV, "not-a-port");
    }
    let bad = Config::load();
    unsafe {
        std::env::remove_var(PORT_ENV);
        std::env::remove_var(TIMEOUT_ENV);
    }

    let cfg = cfg.unwrap();
    assert_eq!(cfg.server.port, 9090);
    assert_eq!(cfg.server.timeout_secs, 30);
    assert!(bad.is_err());
}
