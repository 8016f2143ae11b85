//! Capability gateway: filesystem confinement, KV namespace isolation,
//! and exec allow-listing.

mod common;

use std::sync::Arc;

use common::ChannelTransport;
use sup::kv::Kv;
use sup::plugin::CapabilityGateway;

fn allowed(commands: &[&str]) -> Arc<Vec<String>> {
    Arc::new(commands.iter().map(|c| c.to_string()).collect())
}

async fn gateway_in(
    root: &std::path::Path,
    name: &str,
    commands: &[&str],
) -> (CapabilityGateway, Kv, Kv, Arc<ChannelTransport>) {
    let cache = Kv::open(":memory:").await.unwrap();
    let store = Kv::open(":memory:").await.unwrap();
    let transport = ChannelTransport::new();
    let gateway = CapabilityGateway::new(
        name,
        root,
        &cache,
        &store,
        allowed(commands),
        transport.clone(),
    )
    .unwrap();
    (gateway, cache, store, transport)
}

#[tokio::test]
async fn read_file_inside_root() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &[]).await;

    std::fs::write(tmp.path().join("x/hello.txt"), "hi there").unwrap();
    assert_eq!(gateway.read_file("hello.txt"), "hi there");
    // A leading separator is stripped, not treated as the host root.
    assert_eq!(gateway.read_file("/hello.txt"), "hi there");
}

#[tokio::test]
async fn read_file_cannot_escape_root() {
    let tmp = tempfile::tempdir().unwrap();
    // A sibling of the plugin root, reachable only by escaping.
    std::fs::write(tmp.path().join("outside.txt"), "secret").unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &[]).await;

    assert_eq!(gateway.read_file("../outside.txt"), "");
    assert_eq!(gateway.read_file("../../etc/passwd"), "");
    assert_eq!(gateway.read_file("/etc/passwd"), "");
    assert_eq!(gateway.read_file("a/../../outside.txt"), "");
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_leaving_root_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &[]).await;

    std::os::unix::fs::symlink(tmp.path().join("secret.txt"), tmp.path().join("x/link")).unwrap();
    assert_eq!(gateway.read_file("link"), "");

    // A symlink resolving inside the root still works.
    std::fs::write(tmp.path().join("x/inside.txt"), "fine").unwrap();
    std::os::unix::fs::symlink("inside.txt", tmp.path().join("x/inlink")).unwrap();
    assert_eq!(gateway.read_file("inlink"), "fine");
}

#[tokio::test]
async fn list_directory_returns_base_names() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &[]).await;

    std::fs::write(tmp.path().join("x/a.txt"), "a").unwrap();
    std::fs::create_dir(tmp.path().join("x/sub")).unwrap();
    std::fs::write(tmp.path().join("x/sub/b.txt"), "b").unwrap();

    let out = gateway.list_directory("");
    assert!(out.success);
    let mut files = out.files;
    files.sort();
    assert_eq!(files, vec!["a.txt", "sub"]);

    let out = gateway.list_directory("sub");
    assert!(out.success);
    assert_eq!(out.files, vec!["b.txt"]);

    let out = gateway.list_directory("../");
    assert!(!out.success);
    assert!(out.error.is_some());
}

#[tokio::test]
async fn send_image_is_confinement_checked() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("outside.png"), vec![1u8; 32]).unwrap();
    let (gateway, _, _, transport) = gateway_in(tmp.path(), "x", &[]).await;

    std::fs::write(tmp.path().join("x/pic.png"), vec![2u8; 64]).unwrap();

    assert_eq!(gateway.send_image("friend@host", "pic.png").await, 0);
    assert_eq!(gateway.send_image("friend@host", "../outside.png").await, 1);
    assert_eq!(
        transport.images(),
        vec![("friend@host".to_string(), 64usize)]
    );
}

#[tokio::test]
async fn store_namespaces_are_isolated_per_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = Kv::open(":memory:").await.unwrap();
    let store = Kv::open(":memory:").await.unwrap();
    let transport = ChannelTransport::new();

    let counter = CapabilityGateway::new(
        "counter",
        tmp.path(),
        &cache,
        &store,
        allowed(&[]),
        transport.clone(),
    )
    .unwrap();
    let other = CapabilityGateway::new(
        "other",
        tmp.path(),
        &cache,
        &store,
        allowed(&[]),
        transport,
    )
    .unwrap();

    assert_eq!(counter.set_store("x", "1").await, 0);
    let from_other = other.get_store("x").await;
    assert!(!from_other.success);
    assert_eq!(from_other.data, None);

    let from_counter = counter.get_store("x").await;
    assert!(from_counter.success);
    assert_eq!(from_counter.data.as_deref(), Some("1"));

    // The shared store sees the key under the plugin's namespace.
    assert_eq!(store.get(b"counter:x").await.unwrap(), Some(b"1".to_vec()));
}

#[tokio::test]
async fn list_store_is_scoped_to_namespace() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _cache, store, _) = gateway_in(tmp.path(), "x", &[]).await;

    gateway.set_store("reminder:1", "a").await;
    gateway.set_store("reminder:2", "b").await;
    gateway.set_store("note:1", "c").await;
    store.put(b"y:reminder:3", b"foreign").await.unwrap();

    let out = gateway.list_store("reminder:").await;
    assert!(out.success);
    let mut keys = out.keys;
    keys.sort();
    assert_eq!(keys, vec!["reminder:1", "reminder:2"]);
}

#[tokio::test]
async fn cache_and_store_are_distinct() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &[]).await;

    gateway.set_cache("k", "cached").await;
    let from_store = gateway.get_store("k").await;
    assert!(!from_store.success);
    let from_cache = gateway.get_cache("k").await;
    assert_eq!(from_cache.data.as_deref(), Some("cached"));
}

#[tokio::test]
async fn exec_allowed_command_captures_output() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &["echo"]).await;

    let out = gateway.exec_command("echo hello", "").await;
    assert!(out.success);
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.exit_code, 0);
    assert_eq!(out.error, None);
}

#[tokio::test]
async fn exec_disallowed_command_is_denied() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &["echo"]).await;

    let out = gateway.exec_command("rm -rf /", "").await;
    assert!(!out.success);
    assert!(out.error.unwrap().contains("not in allowed list"));
}

#[tokio::test]
async fn exec_check_ignores_arguments() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &["echo"]).await;

    // "rm" as an argument is fine; only the base name is checked.
    let out = gateway.exec_command("echo rm -rf /", "").await;
    assert!(out.success);
    assert_eq!(out.stdout, "rm -rf /\n");
}

#[tokio::test]
async fn exec_pipes_stdin() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &["cat"]).await;

    let out = gateway.exec_command("cat", "from stdin").await;
    assert!(out.success);
    assert_eq!(out.stdout, "from stdin");
}

#[tokio::test]
async fn exec_empty_command_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &["echo"]).await;

    let out = gateway.exec_command("   ", "").await;
    assert!(!out.success);
    assert_eq!(out.error.as_deref(), Some("empty command"));
}

#[tokio::test]
async fn exec_reports_nonzero_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let (gateway, _, _, _) = gateway_in(tmp.path(), "x", &["false"]).await;

    let out = gateway.exec_command("false", "").await;
    assert!(!out.success);
    assert_eq!(out.exit_code, 1);
    assert_eq!(out.error, None);
}
