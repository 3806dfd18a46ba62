//! Launch state machine against scripted instances.

mod common;

use common::{touch, FakeIda, FakeInstance, FakeSpawner};
use idalink_core::ipc::{EndpointNamespace, IpcClient};
use idalink_core::platform::ProcessProbe;
use idalink_core::process::Launcher;
use idalink_core::{CancellationToken, Discovery, IdaLinkError, LaunchConfig};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const PID: u32 = 4242;

struct Env {
    dir: TempDir,
    ida: FakeIda,
    namespace: EndpointNamespace,
    workspace: PathBuf,
}

fn create_test_env() -> Env {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let sockets = dir.path().join("sockets");
    std::fs::create_dir_all(&sockets).unwrap();
    let workspace = dir.path().join("work").join("Sample.i64");
    touch(&workspace);
    Env {
        namespace: EndpointNamespace::in_dir(&sockets),
        ida: FakeIda::new(),
        workspace,
        dir,
    }
}

fn fast_config() -> LaunchConfig {
    LaunchConfig::new()
        .with_socket_timeout(Duration::from_secs(2))
        .with_workspace_loaded_timeout(Duration::from_secs(2))
        .with_poll_intervals(Duration::from_millis(5), Duration::from_millis(20), 1.5)
        .with_analysis_poll_interval(Duration::from_millis(10))
        .with_analysis_probe_timeout(Duration::from_millis(1))
}

fn launcher(
    env: &Env,
    spawner: FakeSpawner,
    config: LaunchConfig,
) -> Launcher<FakeIda, FakeSpawner, impl ProcessProbe> {
    let discovery = Discovery::with_parts(
        IpcClient::with_transport(env.ida.clone()),
        |_pid: u32| true,
        env.namespace.clone(),
    );
    Launcher::with_parts(discovery, spawner, config)
}

fn exe() -> &'static Path {
    Path::new("/opt/ida/ida")
}

#[test]
fn test_launch_reaches_ready() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).registering(FakeInstance {
        pings_before_ready: Some(3),
        infos_before_loaded: 2,
        ..FakeInstance::empty().with_analysis(&["timeout", "timeout"])
    });
    let endpoint = spawner.endpoint();
    let launcher = launcher(&env, spawner, fast_config());

    let mut messages = Vec::new();
    let result = launcher.launch_and_wait(
        exe(),
        &env.workspace,
        &mut |msg| messages.push(msg.to_string()),
        &CancellationToken::new(),
    );

    assert!(result.success, "{:?}", result.error_message);
    assert!(result.error_message.is_none());
    assert!(result.process.is_some());
    assert!(!result.analysis_skipped);
    let instance = result.instance.unwrap();
    assert_eq!(instance.pid(), PID);
    assert_eq!(instance.workspace_name(), Some("Sample.i64"));

    let state = env.ida.get(&endpoint).unwrap();
    assert_eq!(state.pings, 4);
    assert_eq!(state.analysis_probes, 3);
    assert!(messages.iter().any(|m| m.starts_with("Waiting for analysis... (")));
    assert!(messages.last().unwrap().starts_with("Analysis complete ("));
}

#[test]
fn test_early_exit_reports_exit_code() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).exiting(0, 3);
    let launcher = launcher(&env, spawner, fast_config());

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());

    assert!(!result.success);
    assert!(result.instance.is_none());
    assert!(result.process.is_some());
    assert_eq!(result.error.as_ref().and_then(IdaLinkError::exit_code), Some(3));
    assert!(result.error_message.unwrap().contains("code 3"));
}

#[test]
fn test_exit_during_load_is_fatal() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance {
            infos_before_loaded: u32::MAX,
            ..FakeInstance::empty()
        })
        .exiting(3, 1);
    let launcher = launcher(&env, spawner, fast_config());

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    let err = result.into_result().unwrap_err();
    assert_eq!(err.exit_code(), Some(1));
}

#[test]
fn test_socket_timeout_is_phase_tagged() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).registering(FakeInstance::unresponsive());
    let config = fast_config()
        .with_socket_timeout(Duration::from_secs(1))
        .with_poll_intervals(Duration::from_millis(100), Duration::from_secs(2), 1.5);
    let launcher = launcher(&env, spawner, config);

    let started = Instant::now();
    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    let elapsed = started.elapsed();

    let err = result.into_result().unwrap_err();
    assert_eq!(err.phase(), Some("socket_responsive"));
    assert_eq!(err.to_string(), "startup timeout after 1s during socket_responsive");
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

#[test]
fn test_wrong_workspace_times_out_loading() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).registering(FakeInstance::ready("/elsewhere/other.i64"));
    let config = fast_config().with_workspace_loaded_timeout(Duration::from_millis(200));
    let launcher = launcher(&env, spawner, config);

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert_eq!(result.error.as_ref().and_then(|e| e.phase()), Some("workspace_loaded"));
}

#[test]
fn test_workspace_name_matches_case_insensitively() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).registering(FakeInstance::ready("/w/sample.I64"));
    let launcher = launcher(&env, spawner, fast_config().with_skip_analysis_wait(true));

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert!(result.success, "{:?}", result.error_message);
}

#[test]
fn test_skip_analysis_wait_sends_no_probe() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).registering(FakeInstance::empty());
    let endpoint = spawner.endpoint();
    let launcher = launcher(&env, spawner, fast_config().with_skip_analysis_wait(true));

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert!(result.success);
    assert_eq!(env.ida.get(&endpoint).unwrap().analysis_probes, 0);
}

#[test]
fn test_interrupt_during_analysis_still_succeeds() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance::empty().with_analysis(&["timeout"; 64]));
    let config = fast_config().with_analysis_poll_interval(Duration::from_secs(30));
    let launcher = launcher(&env, spawner, config);

    let cancel = CancellationToken::new();
    let remote = cancel.clone();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        remote.cancel();
    });

    let started = Instant::now();
    let mut messages = Vec::new();
    let result = launcher.launch_and_wait(
        exe(),
        &env.workspace,
        &mut |msg| messages.push(msg.to_string()),
        &cancel,
    );
    interrupter.join().unwrap();

    assert!(result.success);
    assert!(result.analysis_skipped);
    assert!(result.instance.is_some());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(messages.last().map(String::as_str), Some("Analysis wait skipped"));
}

#[test]
fn test_early_interrupt_does_not_skip_analysis() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance::empty().with_analysis(&["timeout", "timeout"]));
    let endpoint = spawner.endpoint();
    let launcher = launcher(&env, spawner, fast_config());

    let cancel = CancellationToken::disarmed();
    assert!(!cancel.cancel());

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &cancel);
    assert!(result.success);
    assert!(!result.analysis_skipped);
    assert_eq!(env.ida.get(&endpoint).unwrap().analysis_probes, 3);
}

#[test]
fn test_disarmed_token_only_trips_during_analysis() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance::empty().with_analysis(&["timeout"; 64]));
    let endpoint = spawner.endpoint();
    let config = fast_config().with_analysis_poll_interval(Duration::from_secs(30));
    let launcher = launcher(&env, spawner, config);

    // A Ctrl+C before the analysis wait is not absorbed by the token
    let cancel = CancellationToken::disarmed();
    assert!(!cancel.cancel());

    let remote = cancel.clone();
    let interrupter = thread::spawn(move || {
        let started = Instant::now();
        while !remote.cancel() {
            assert!(started.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(5));
        }
    });

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &cancel);
    interrupter.join().unwrap();

    assert!(result.success);
    assert!(result.analysis_skipped);
    assert!(cancel.is_cancelled());
    assert!(env.ida.get(&endpoint).is_some());
    // Disarmed again once the wait is over
    assert!(!cancel.cancel());
}

#[test]
fn test_cancelled_inside_ida_counts_as_skip() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance::empty().with_analysis(&["timeout", "cancelled"]));
    let launcher = launcher(&env, spawner, fast_config());

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert!(result.success);
    assert!(result.analysis_skipped);
}

#[test]
fn test_analysis_error_fails_launch() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance::empty().with_analysis(&["database closed"]));
    let launcher = launcher(&env, spawner, fast_config());

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("database closed"));
}

#[test]
fn test_missing_workspace_is_rejected_before_spawn() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID);
    let launcher = launcher(&env, spawner, fast_config());

    let missing = env.dir.path().join("missing.i64");
    let result = launcher.launch_and_wait(exe(), &missing, &mut |_| {}, &CancellationToken::new());
    assert!(!result.success);
    assert!(result.process.is_none());
    assert_eq!(
        result.error_message.unwrap(),
        format!("IDB file not found: {}", missing.display())
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID);
    let config = fast_config().with_poll_intervals(Duration::from_millis(5), Duration::from_millis(20), 0.5);
    let launcher = launcher(&env, spawner, config);

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert!(matches!(result.error, Some(IdaLinkError::Validation { .. })));
}

#[cfg(unix)]
#[test]
fn test_detached_launch_found_by_discovery() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID)
        .registering(FakeInstance::empty())
        .detached();
    let launcher = launcher(&env, spawner, fast_config());

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    assert!(result.success, "{:?}", result.error_message);
    assert!(result.process.is_none());
    assert_eq!(result.instance.unwrap().pid(), PID);
}

#[cfg(unix)]
#[test]
fn test_detached_launch_times_out_as_workspace_loaded() {
    let env = create_test_env();
    let spawner = FakeSpawner::new(&env.ida, &env.namespace, PID).detached();
    let config = fast_config()
        .with_socket_timeout(Duration::from_millis(100))
        .with_workspace_loaded_timeout(Duration::from_millis(100));
    let launcher = launcher(&env, spawner, config);

    let result = launcher.launch_and_wait(exe(), &env.workspace, &mut |_| {}, &CancellationToken::new());
    let err = result.into_result().unwrap_err();
    assert_eq!(err.phase(), Some("workspace_loaded"));
}
