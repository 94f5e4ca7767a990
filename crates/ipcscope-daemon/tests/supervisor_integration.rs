#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! End-to-end supervisor tests against small shell stand-ins for the demos.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use ipcscope_core::Category;
use ipcscope_core::config::{BusConfig, MirrorConfig, SupervisorConfig};
use ipcscope_daemon::bus::{BusMessage, EventBus, Subscription};
use ipcscope_daemon::supervisor::{ProcessSupervisor, SupervisorError};

const PIPE_MONITOR: &str = r#"#!/bin/sh
echo '{"type":"system","process":"monitor","message":"Pipe monitor iniciado"}'
while read cmd; do
  case "$cmd" in
    send*) msg="${cmd#send }"
           echo "{\"type\":\"pipe_write\",\"process\":\"parent\",\"pid\":$$,\"message\":\"Escrevendo no pipe\",\"data\":\"$msg\"}"
           echo "{\"type\":\"pipe_write\",\"process\":\"parent\",\"message\":\"Mensagem escrita\",\"data\":\"bytes=${#msg}\"}" ;;
    read)  echo '{"type":"pipe_read","process":"child","message":"Mensagem recebida","data":"x"}' ;;
    quit)  exit 0 ;;
    *)     echo "Comando desconhecido: $cmd" ;;
  esac
done
"#;

const SOCKET_SERVER: &str = r#"#!/bin/sh
echo '{"type":"system","component":"server","message":"Servidor iniciado"}'
while read cmd; do echo "server: $cmd"; done
"#;

const SOCKET_CLIENT: &str = r#"#!/bin/sh
echo '{"type":"system","component":"client","message":"Cliente iniciado"}'
while read cmd; do
  case "$cmd" in
    connect) echo '{"type":"connection","component":"client","message":"Conectado ao servidor","data":"/tmp/demo_socket"}' ;;
    close)   echo '{"type":"connection","component":"client","message":"Conexão fechada"}' ;;
  esac
done
"#;

const SHARED_MEMORY: &str = r#"#!/bin/sh
echo '{"type":"system","message":"Gerenciador de memória iniciado"}'
while read cmd; do
  case "$cmd" in
    write*) echo "{\"type\":\"write\",\"process\":\"writer\",\"pid\":$$,\"message\":\"Dados escritos\",\"data\":\"${cmd#write }\"}" ;;
    status) echo 'MEMORY_STATE: {"memory":{"counter":5,"last_writer":77},"semaphore":{"value":1,"available":true}}' ;;
  esac
done
"#;

const CHATTY: &str = r#"#!/bin/sh
echo "first"
echo '{"type":"future_type","data":"kept as text"}'
echo "oops" >&2
printf 'tail without newline'
exit 3
"#;

const STUBBORN: &str = r#"#!/bin/sh
trap '' TERM
echo ready
while true; do sleep 1; done
"#;

/// Exits at once while a background child keeps the output pipes open.
const DETACHED: &str = r#"#!/bin/sh
echo up
(sleep 3) &
exit 0
"#;

const IDLE: &str = "#!/bin/sh\nwhile read cmd; do :; done\n";

fn install(backend: &Path, category: &str, program: &str, script: &str) {
    let path = backend.join(category).join(program);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

fn backend() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "pipes", "pipe_monitor", PIPE_MONITOR);
    install(dir.path(), "pipes", "chatty", CHATTY);
    install(dir.path(), "pipes", "stubborn", STUBBORN);
    install(dir.path(), "pipes", "detached", DETACHED);
    install(dir.path(), "sockets", "server", SOCKET_SERVER);
    install(dir.path(), "sockets", "client", SOCKET_CLIENT);
    install(dir.path(), "sockets", "probe", IDLE);
    install(dir.path(), "shared_memory", "shared_memory", SHARED_MEMORY);
    dir
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        terminate_timeout_ms: 300,
        drain_timeout_ms: 200,
        ..SupervisorConfig::default()
    }
}

fn supervisor_with(backend: &Path, config: SupervisorConfig) -> ProcessSupervisor {
    ProcessSupervisor::new(
        backend.to_path_buf(),
        config,
        MirrorConfig::default(),
        Arc::new(EventBus::new(BusConfig::default())),
    )
}

async fn subscribe(sup: &ProcessSupervisor) -> Subscription {
    let mut sub = sup.bus().subscribe().await;
    let hello = next_event(&mut sub, |_| true).await;
    assert_eq!(hello["type"], "connected");
    sub
}

/// Next envelope satisfying `pred`, skipping everything else.
async fn next_event(sub: &mut Subscription, mut pred: impl FnMut(&Value) -> bool) -> Value {
    let wait = async {
        loop {
            match sub.recv().await {
                Some(BusMessage::Envelope(json)) => {
                    let value: Value = serde_json::from_str(&json).unwrap();
                    if pred(&value) {
                        return value;
                    }
                }
                Some(BusMessage::Heartbeat) => {}
                None => panic!("subscription closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}

/// Every envelope up to and including the `exit` of `id`.
async fn events_until_exit(sub: &mut Subscription, id: &str) -> Vec<Value> {
    let mut seen = Vec::new();
    let exit = next_event(sub, |v| {
        if v["processId"] != id {
            return false;
        }
        seen.push(v.clone());
        v["type"] == "exit"
    })
    .await;
    assert_eq!(seen.last(), Some(&exit));
    seen
}

#[tokio::test]
async fn pipe_buffer_follows_writes_and_reads() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let id = sup
        .start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap();
    let started = next_event(&mut sub, |v| v["type"] == "state_update").await;
    assert_eq!(started["data"]["running"], true);
    assert_eq!(started["data"]["state"]["running"], true);

    sup.send_command(id, "send hello world!").await.unwrap();
    let written = next_event(&mut sub, |v| v["type"] == "state_update").await;
    assert_eq!(written["data"]["state"]["buffer"], 12);

    sup.send_command(id, "read").await.unwrap();
    let read = next_event(&mut sub, |v| v["type"] == "state_update").await;
    assert_eq!(read["data"]["state"]["buffer"], 2);

    sup.send_command(id, "read").await.unwrap();
    let drained = next_event(&mut sub, |v| v["type"] == "state_update").await;
    assert_eq!(drained["data"]["state"]["buffer"], 0);
    assert_eq!(sup.mirror().await.pipes.buffer, 0);

    sup.send_command(id, "quit").await.unwrap();
    let exit = next_event(&mut sub, |v| v["type"] == "exit").await;
    assert_eq!(exit["exitCode"], 0);
    let stopped = next_event(&mut sub, |v| v["type"] == "state_update").await;
    assert_eq!(stopped["data"]["running"], false);
    assert_eq!(stopped["data"]["state"]["running"], false);
}

#[tokio::test]
async fn socket_client_connection_is_mirrored() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let server = sup.start(Category::Sockets, "server", Vec::new()).await.unwrap();
    let client = sup.start(Category::Sockets, "client", Vec::new()).await.unwrap();
    sup.send_command(client, "connect").await.unwrap();

    let update = next_event(&mut sub, |v| {
        v["type"] == "state_update" && v["data"]["state"]["client"]["connected"] == true
    })
    .await;
    assert_eq!(update["processId"], client.to_string());
    assert_eq!(update["data"]["state"]["server"]["connections"], 1);

    let mirror = sup.mirror().await;
    assert!(mirror.sockets.client.connected);
    assert_eq!(mirror.sockets.server.connections, 1);

    sup.stop(server).await.unwrap();
    next_event(&mut sub, |v| {
        v["type"] == "exit" && v["processId"] == server.to_string()
    })
    .await;
    let mirror = sup.mirror().await;
    assert!(!mirror.sockets.server.running);
    assert_eq!(mirror.sockets.server.connections, 0);
    assert!(!mirror.sockets.client.connected);
    assert!(mirror.sockets.client.running);

    sup.shutdown().await;
}

#[tokio::test]
async fn shared_memory_write_then_stop_resets() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let id = sup
        .start(Category::SharedMemory, "shared_memory", Vec::new())
        .await
        .unwrap();
    sup.send_command(id, "write abc").await.unwrap();

    let update = next_event(&mut sub, |v| {
        v["type"] == "state_update" && v["data"]["state"]["counter"] == 1
    })
    .await;
    assert_eq!(update["data"]["state"]["semaphore"], "locked");
    assert!(update["data"]["state"]["lastWriter"].is_string());

    sup.send_command(id, "status").await.unwrap();
    let snapshot = next_event(&mut sub, |v| {
        v["type"] == "state_update" && v["data"]["state"]["counter"] == 5
    })
    .await;
    assert_eq!(snapshot["data"]["state"]["lastWriter"], "77");
    assert_eq!(snapshot["data"]["state"]["semaphore"], "unlocked");

    sup.stop(id).await.unwrap();
    next_event(&mut sub, |v| v["type"] == "exit").await;
    let reset = next_event(&mut sub, |v| v["type"] == "state_update").await;
    assert_eq!(reset["data"]["state"]["counter"], 0);
    assert_eq!(reset["data"]["state"]["semaphore"], "unlocked");
    assert!(reset["data"]["state"]["lastWriter"].is_null());
    assert_eq!(reset["data"]["state"]["managerRunning"], false);
}

#[tokio::test]
async fn exit_is_last_and_unique() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let id = sup.start(Category::Pipes, "chatty", Vec::new()).await.unwrap();
    let events = events_until_exit(&mut sub, &id.to_string()).await;

    let outputs: Vec<&str> = events
        .iter()
        .filter(|v| v["type"] == "output")
        .map(|v| v["data"].as_str().unwrap())
        .collect();
    assert_eq!(
        outputs,
        vec![
            "first",
            r#"{"type":"future_type","data":"kept as text"}"#,
            "tail without newline"
        ]
    );
    let errors: Vec<&Value> = events.iter().filter(|v| v["type"] == "error").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["data"], "oops");
    assert_eq!(events.last().unwrap()["exitCode"], 3);

    // Only the closing state update may follow.
    let stopped = next_event(&mut sub, |v| v["processId"] == id.to_string()).await;
    assert_eq!(stopped["type"], "state_update");
    let more = tokio::time::timeout(Duration::from_millis(300), sub.recv()).await;
    assert!(more.is_err(), "unexpected event after exit: {more:?}");

    let detail = sup.process(id).await.unwrap();
    assert!(!detail.summary.running);
    assert_eq!(detail.summary.exit_code, Some(3));
    assert_eq!(detail.output.len(), 4);
}

#[tokio::test]
async fn stop_after_exit_is_not_found() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let id = sup
        .start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap();
    sup.stop(id).await.unwrap();
    next_event(&mut sub, |v| v["type"] == "exit").await;

    assert!(matches!(
        sup.stop(id).await,
        Err(SupervisorError::ProcessNotFound { .. })
    ));
    assert!(matches!(
        sup.send_command(id, "read").await,
        Err(SupervisorError::ProcessNotFound { .. })
    ));

    // The record is still retained for inspection.
    let listed = sup.list_processes().await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].running);
}

#[tokio::test]
async fn requests_are_refused_once_the_child_is_reaped() {
    let dir = backend();
    let sup = supervisor_with(
        dir.path(),
        SupervisorConfig {
            drain_timeout_ms: 2000,
            ..config()
        },
    );
    let mut sub = subscribe(&sup).await;

    let id = sup.start(Category::Pipes, "detached", Vec::new()).await.unwrap();
    next_event(&mut sub, |v| v["type"] == "output" && v["data"] == "up").await;

    // The shell is gone, but its background child still holds stdout, so the
    // readers have not drained and no exit has been published.
    tokio::time::timeout(Duration::from_secs(1), async {
        while sup.process(id).await.unwrap().summary.running {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("child still reported running");
    assert_eq!(sup.live_count().await, 1);
    assert!(matches!(
        sup.stop(id).await,
        Err(SupervisorError::ProcessNotFound { .. })
    ));
    assert!(matches!(
        sup.send_command(id, "read").await,
        Err(SupervisorError::ProcessNotFound { .. })
    ));
    assert_eq!(sup.process(id).await.unwrap().summary.pid, None);

    let exit = next_event(&mut sub, |v| v["type"] == "exit").await;
    assert_eq!(exit["processId"], id.to_string());
    assert_eq!(exit["exitCode"], 0);
}

#[cfg(unix)]
#[tokio::test]
async fn process_ignoring_sigterm_is_killed_after_grace() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let id = sup.start(Category::Pipes, "stubborn", Vec::new()).await.unwrap();
    next_event(&mut sub, |v| v["type"] == "output" && v["data"] == "ready").await;

    let asked = Instant::now();
    sup.stop(id).await.unwrap();
    // A second request neither fails nor arms another timer.
    sup.stop(id).await.unwrap();

    let exit = next_event(&mut sub, |v| v["type"] == "exit").await;
    assert!(asked.elapsed() >= Duration::from_millis(300));
    assert!(exit["exitCode"].is_null());
    assert_eq!(exit["data"], "Process terminated by signal 9");
}

#[tokio::test]
async fn rapid_starts_get_distinct_increasing_ids() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());

    let first = sup.start(Category::Sockets, "probe", Vec::new()).await.unwrap();
    let second = sup.start(Category::Sockets, "probe", Vec::new()).await.unwrap();
    assert!(second > first);
    assert_eq!(sup.live_count().await, 2);

    sup.shutdown().await;
    assert_eq!(sup.live_count().await, 0);
}

#[tokio::test]
async fn second_start_of_same_role_is_rejected() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());

    let first = sup
        .start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap();
    let err = sup
        .start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap_err();
    let SupervisorError::RoleBusy { id, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(id, first);
    assert_eq!(sup.list_processes().await.len(), 1);

    sup.shutdown().await;
}

#[tokio::test]
async fn duplicate_roles_can_be_allowed() {
    let dir = backend();
    let sup = supervisor_with(
        dir.path(),
        SupervisorConfig {
            allow_duplicate_roles: true,
            ..config()
        },
    );

    sup.start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap();
    sup.start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap();
    assert_eq!(sup.live_count().await, 2);

    sup.shutdown().await;
}

#[tokio::test]
async fn unknown_program_fails_synchronously() {
    let dir = backend();
    let sup = supervisor_with(dir.path(), config());
    let mut sub = subscribe(&sup).await;

    let err = sup
        .start(Category::Pipes, "nonexistent", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ProgramNotFound { .. }));
    assert!(sup.list_processes().await.is_empty());
    assert!(
        tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .is_err()
    );

    // The failed attempt consumed no id.
    let id = sup
        .start(Category::Pipes, "pipe_monitor", Vec::new())
        .await
        .unwrap();
    assert_eq!(id.get(), 1);
    sup.shutdown().await;
}
