//! End-to-end test of the control socket: binds a real Unix listener,
//! sends framed wire requests, checks the framed wire replies. Uses a
//! config with no managed hosts so no driver ever shells out.

use assert_fs::TempDir;
use clustdockd::config::Config;
use clustdockd::wire::{self, Reply};
use clustdock_utils::framing::{read_frame, write_frame};
use std::time::Duration;
use tokio::net::UnixStream;

async fn spawn_daemon(bind_addr: String) {
    spawn_daemon_with_config(
        bind_addr,
        r#"
        managed_hosts = []
        "#,
    )
    .await;
}

async fn spawn_daemon_with_config(bind_addr: String, extra_toml: &str) {
    let toml = format!(
        r#"
        bind_addr = "{bind_addr}"
        worker_count = 2
        {extra_toml}
        "#
    );
    let config_path = TempDir::new().unwrap().into_persistent();
    let config_file = config_path.join("clustdockd.toml");
    tokio::fs::write(&config_file, toml).await.unwrap();
    let config = Config::load(&config_file).await.unwrap();
    tokio::spawn(async move {
        clustdockd::dispatcher::run(config).await.unwrap();
    });
    // give the listener a moment to bind before the first connection attempt
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn roundtrip(socket: &str, line: &str) -> Reply {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    write_frame(&mut stream, line.as_bytes()).await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap().unwrap();
    wire::decode_reply(&frame).unwrap()
}

#[tokio::test]
async fn list_with_no_managed_hosts_is_empty() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("clustdockd.sock");
    let socket = socket.to_str().unwrap().to_string();
    spawn_daemon(socket.clone()).await;

    let reply = roundtrip(&socket, "list False").await;
    match reply {
        Reply::List(map) => assert!(map.is_empty()),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn spawn_with_unknown_profile_is_rejected() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("clustdockd.sock");
    let socket = socket.to_str().unwrap().to_string();
    spawn_daemon(socket.clone()).await;

    let reply = roundtrip(&socket, "spawn nope web 2 None").await;
    match reply {
        Reply::Error(message) => assert!(message.contains("unknown profile")),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_request_reports_a_wire_error() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("clustdockd.sock");
    let socket = socket.to_str().unwrap().to_string();
    spawn_daemon(socket.clone()).await;

    let reply = roundtrip(&socket, "frobnicate").await;
    match reply {
        Reply::Error(message) => assert!(message.contains("unknown command")),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn stop_nodes_on_unknown_name_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("clustdockd.sock");
    let socket = socket.to_str().unwrap().to_string();
    spawn_daemon(socket.clone()).await;

    let reply = roundtrip(&socket, "stop_nodes web0").await;
    match reply {
        Reply::NodesetResult { nodeset, errors } => {
            assert!(nodeset.is_empty());
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("not found"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn get_ip_on_unknown_name_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("clustdockd.sock");
    let socket = socket.to_str().unwrap().to_string();
    spawn_daemon(socket.clone()).await;

    let reply = roundtrip(&socket, "get_ip web0").await;
    match reply {
        Reply::IpList { ips, errors } => {
            assert!(ips.is_empty());
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("not found"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn spawn_with_unmanaged_host_is_rejected() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("clustdockd.sock");
    let socket = socket.to_str().unwrap().to_string();
    spawn_daemon_with_config(
        socket.clone(),
        r#"
        managed_hosts = ["hostA"]

        [profiles.web]
        kind = "container"

        [profiles.web.default]
        image = "debian:bookworm"
        "#,
    )
    .await;

    let reply = roundtrip(&socket, "spawn web web 2 hostZ").await;
    match reply {
        Reply::Error(message) => assert!(message.contains("not managed")),
        other => panic!("unexpected reply: {other:?}"),
    }
}
