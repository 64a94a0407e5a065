//! End-to-end scenarios exercising the lifecycle controller, dispatcher, and
//! admission control together against real loopback sockets.

use std::io::Write;
use std::net::TcpStream as StdTcpStream;
use std::time::Duration;

use tunnel_config::{Configuration, Direction, GlobalOptions, ServiceDefinition, TlsRole};
use tunneld::dispatcher;
use tunneld::session::EchoSessionHandler;
use tunneld::worker::{ClientCounter, WorkerSupervisor};

fn accepting_service(name: &str, addr: &str) -> ServiceDefinition {
    ServiceDefinition {
        name: name.to_string(),
        direction: Direction::Accepting,
        accept: Some(addr.to_string()),
        connect: Some("127.0.0.1:1".to_string()),
        exec: None,
        cert: "cert.pem".into(),
        key: None,
        client: TlsRole::Server,
        socket: Default::default(),
    }
}

#[tokio::test]
async fn bind_failure_leaves_no_pid_file_and_reports_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("tunneld.pid");

    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let busy_addr = holder.local_addr().unwrap();

    let config = Configuration {
        global: GlobalOptions {
            foreground: true,
            pid: Some(pid_path.clone()),
            ..Default::default()
        },
        services: vec![accepting_service("busy", &busy_addr.to_string())],
    };

    let code = tunneld::run(config).await;
    assert_eq!(code, 1);
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn admission_cap_rejects_the_third_simultaneous_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = accepting_service("capped", &addr.to_string());

    let counter = std::sync::Arc::new(ClientCounter::new(2));
    let supervisor = WorkerSupervisor::new(counter.clone(), std::sync::Arc::new(EchoSessionHandler));

    // Three clients connect; the dispatcher only admits the first two.
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(tokio::task::spawn_blocking(move || StdTcpStream::connect(addr).unwrap()));
    }

    for _ in 0..3 {
        dispatcher::accept_one(&listener, &service, &supervisor, 0).await.unwrap();
    }
    for client in clients {
        client.await.unwrap();
    }

    // Admission is synchronous per accept_one call, so the count is exact
    // immediately: two admitted, the rejected third never touched the
    // counter and its socket was closed by the dispatcher.
    assert_eq!(counter.current(), 2);
}

#[tokio::test]
async fn sigterm_during_the_multiplexer_wait_exits_with_code_3_and_removes_the_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("tunneld.pid");

    let config = Configuration {
        global: GlobalOptions {
            foreground: true,
            pid: Some(pid_path.clone()),
            ..Default::default()
        },
        services: vec![accepting_service("signal-test", "127.0.0.1:0")],
    };

    let handle = tokio::spawn(tunneld::run(config));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pid_path.exists());

    unsafe {
        libc::raise(libc::SIGTERM);
    }

    let code = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("daemon should exit after SIGTERM")
        .unwrap();
    assert_eq!(code, 3);
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn relative_pid_path_fails_configuration_validation() {
    let toml = "[global]\nforeground = true\npid = \"tunneld-relative-test.pid\"\n\n[[service]]\nname = \"rel-pid\"\ndirection = \"accepting\"\naccept = \"127.0.0.1:0\"\nconnect = \"127.0.0.1:1\"\ncert = \"cert.pem\"\nclient = \"server\"\n";
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("tunneld.toml");
    std::fs::File::create(&config_path)
        .unwrap()
        .write_all(toml.as_bytes())
        .unwrap();

    let result = tunnel_config::load_file(&config_path);
    assert!(result.is_err(), "a relative pid path must fail validation");
}

#[tokio::test]
async fn privilege_drop_is_a_no_op_when_nothing_is_configured() {
    // Exercising a real chroot/setuid sequence needs root privileges this
    // suite does not run with; the ordering itself (chroot, then pid write,
    // then setgid/setuid) is covered at the unit level in `privilege.rs`.
    let global = GlobalOptions::default();
    assert!(tunneld::privilege::drop_privileges(&global).is_ok());
}
