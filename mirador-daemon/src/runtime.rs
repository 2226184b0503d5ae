use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use mirador_core::{config, InstanceId, Settings, YamlStateStore};
use mirador_sync::{HttpSiteHook, PreviewService, SiteHook, Switcher};

use crate::error::{io_err, DaemonError};
use crate::paths::{mirador_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Set to `json` for one JSON object per log line.
pub const LOG_FORMAT_ENV: &str = "MIRADOR_LOG_FORMAT";

pub type Service = PreviewService<YamlStateStore>;

/// Load settings from `home`, open the clone, and block until the daemon exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let settings = config::load_at(home)?;
    let service = build_service(home, &settings)?;
    tracing::info!(
        repository = %settings.repository_path.display(),
        lease_minutes = settings.lease_minutes,
        "preview service ready"
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), Arc::new(service)))
}

pub fn build_service(home: &Path, settings: &Settings) -> Result<Service, DaemonError> {
    let hook: Arc<dyn SiteHook> = Arc::new(HttpSiteHook::from_settings(settings));
    let switcher = Switcher::from_settings(settings, hook)?;
    Ok(PreviewService::new(
        switcher,
        YamlStateStore::at(home),
        settings.lease(),
    ))
}

/// Run the socket server until `stop` or ctrl-c.
pub async fn run(home: PathBuf, service: Arc<Service>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at = Utc::now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let service = service.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                service,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!(
        completed_switches = service.completed_switches(),
        "daemon stopped"
    );
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    service: Arc<Service>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let service = service.clone();
                let shutdown_tx = shutdown_tx.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        service,
                        shutdown_tx,
                        socket,
                        started_at,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    service: Arc<Service>,
    shutdown_tx: broadcast::Sender<()>,
    socket: PathBuf,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = if stop {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        } else {
            dispatch(service.clone(), request, socket.clone(), started_at).await
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// Run one request on a blocking worker; git and the store never block the reactor.
async fn dispatch(
    service: Arc<Service>,
    request: DaemonRequest,
    socket: PathBuf,
    started_at: DateTime<Utc>,
) -> DaemonResponse {
    let cmd = request.cmd.clone();
    let instance = request.instance;
    let joined =
        tokio::task::spawn_blocking(move || execute(&service, &request, &socket, started_at)).await;
    match joined {
        Ok(Ok(data)) => DaemonResponse::ok(data),
        Ok(Err(err)) => failure_response(&cmd, instance, err),
        Err(err) => {
            tracing::error!(cmd = %cmd, error = %err, "request worker failed");
            DaemonResponse::error(format!("request worker failed: {err}"))
        }
    }
}

fn execute(
    service: &Service,
    request: &DaemonRequest,
    socket: &Path,
    started_at: DateTime<Utc>,
) -> Result<Value, DaemonError> {
    let data = match request.cmd.as_str() {
        "status" => build_status_payload(service, socket, started_at)?,
        "switch" => json!(service.switch(request.instance()?, &request.switch_request()?)?),
        "switch-any" => json!(service.switch_any(&request.switch_request()?)?),
        "refresh" => json!(service.refresh(request.instance()?)?),
        "news" => json!(service.push_news_preview(request.instance()?, &request.news_post()?)?),
        "flags" => json!(service.set_flags(request.instance()?, request.redate, request.master)?),
        "link" => json!(service.link_pull_request(request.instance()?, request.pull_request)?),
        "release" => json!(service.release(request.instance()?)?),
        "state" => match request.instance {
            Some(id) => json!(service.state(id)?),
            None => json!(service.instances()?),
        },
        other => return Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    };
    Ok(data)
}

/// Map a failed request to a response. Every failure except `busy` is logged
/// here: classified ones briefly, anything else with full detail.
fn failure_response(cmd: &str, instance: Option<InstanceId>, err: DaemonError) -> DaemonResponse {
    let instance = instance.map_or_else(|| "-".to_string(), |id| id.to_string());
    match err {
        DaemonError::Service(err) if err.is_busy() => DaemonResponse::busy(err.user_message()),
        DaemonError::Service(err) => {
            if err.is_classified() {
                tracing::warn!(cmd = %cmd, instance = %instance, error = %err, "request failed");
            } else {
                tracing::error!(cmd = %cmd, instance = %instance, error = ?err, "request failed unexpectedly");
            }
            DaemonResponse::error(err.user_message())
        }
        DaemonError::Protocol(message) => {
            tracing::warn!(cmd = %cmd, error = %message, "rejected request");
            DaemonResponse::error(message)
        }
        other => {
            tracing::error!(cmd = %cmd, instance = %instance, error = ?other, "request failed unexpectedly");
            DaemonResponse::error(other.to_string())
        }
    }
}

fn build_status_payload(
    service: &Service,
    socket: &Path,
    started_at: DateTime<Utc>,
) -> Result<Value, DaemonError> {
    let instances = service.instances()?;
    Ok(json!({
        "running": true,
        "pid": std::process::id(),
        "started_at": started_at,
        "socket": socket.display().to_string(),
        "completed_switches": service.completed_switches(),
        "instances": instances,
    }))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = mirador_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// `RUST_LOG` filter (default `info`); [`LOG_FORMAT_ENV`]`=json` for JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    use mirador_core::store::add_instance_at;
    use mirador_core::{Instance, StoreError};
    use mirador_sync::ServiceError;
    use tempfile::TempDir;

    fn have_git() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Service over an empty clone with instances 1 and 2; enough for everything but switching.
    fn service(home: &TempDir) -> Service {
        let repo = home.path().join("website");
        fs::create_dir_all(&repo).expect("mkdir");
        let status = Command::new("git")
            .arg("-C")
            .arg(&repo)
            .args(["init", "--quiet"])
            .status()
            .expect("git init");
        assert!(status.success());
        for id in [1, 2] {
            add_instance_at(
                home.path(),
                &Instance {
                    id: InstanceId(id),
                    control_channel: format!("C{id}"),
                    port: 9000 + id as u16,
                },
            )
            .expect("add instance");
        }
        let settings = Settings {
            repository_path: repo,
            ..Settings::default()
        };
        build_service(home.path(), &settings).expect("service")
    }

    fn started() -> DateTime<Utc> {
        DateTime::from_timestamp(1_000_000, 0).expect("timestamp")
    }

    #[test]
    fn status_payload_lists_instances() {
        if !have_git() {
            eprintln!("skipping: git not found in PATH");
            return;
        }
        let home = TempDir::new().expect("home");
        let service = service(&home);

        let payload = build_status_payload(&service, Path::new("/tmp/x.sock"), started()).expect("status");

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["completed_switches"], json!(0));
        assert_eq!(payload["instances"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["instances"][0]["busy"], json!(false));
        assert_eq!(payload["instances"][0]["state"], Value::Null);
    }

    #[test]
    fn unknown_command_and_missing_fields_are_protocol_errors() {
        if !have_git() {
            eprintln!("skipping: git not found in PATH");
            return;
        }
        let home = TempDir::new().expect("home");
        let service = service(&home);
        let socket = socket_path(home.path());

        let err = execute(&service, &DaemonRequest::new("reboot"), &socket, started()).unwrap_err();
        assert!(err.to_string().contains("unknown command 'reboot'"));

        let err = execute(&service, &DaemonRequest::new("refresh"), &socket, started()).unwrap_err();
        assert!(err.to_string().contains("missing field 'instance'"));
    }

    #[test]
    fn busy_instance_maps_to_busy_response() {
        if !have_git() {
            eprintln!("skipping: git not found in PATH");
            return;
        }
        let home = TempDir::new().expect("home");
        let service = service(&home);
        let socket = socket_path(home.path());

        let _held = service.locks().guard(InstanceId(1)).expect("free");
        let err = execute(
            &service,
            &DaemonRequest::for_instance("release", InstanceId(1)),
            &socket,
            started(),
        )
        .unwrap_err();
        let response = failure_response("release", Some(InstanceId(1)), err);

        assert!(!response.ok);
        assert!(response.busy);
        assert!(response.error.unwrap_or_default().contains("busy"));
    }

    #[test]
    fn flags_without_preview_is_reported() {
        if !have_git() {
            eprintln!("skipping: git not found in PATH");
            return;
        }
        let home = TempDir::new().expect("home");
        let service = service(&home);
        let socket = socket_path(home.path());

        let request = DaemonRequest {
            redate: Some(true),
            ..DaemonRequest::for_instance("flags", InstanceId(2))
        };
        let response = failure_response(
            "flags",
            Some(InstanceId(2)),
            execute(&service, &request, &socket, started()).unwrap_err(),
        );
        assert!(!response.busy);
        assert!(response.error.unwrap_or_default().contains("not showing anything"));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a subscriber that records formatted events.
    fn with_captured_log<T>(f: impl FnOnce() -> T) -> (T, String) {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8_lossy(&log.0.lock().unwrap()).into_owned();
        (out, text)
    }

    #[test]
    fn unexpected_store_failure_is_logged_with_detail() {
        let err = DaemonError::Service(ServiceError::Store(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk gone",
        ))));

        let (response, log) = with_captured_log(|| failure_response("state", None, err));

        assert!(response
            .error
            .unwrap_or_default()
            .contains("the error has been logged"));
        assert!(log.contains("request failed unexpectedly"), "{log}");
        assert!(log.contains("disk gone"), "{log}");
    }

    #[test]
    fn undefined_instance_gets_a_real_message() {
        if !have_git() {
            eprintln!("skipping: git not found in PATH");
            return;
        }
        let home = TempDir::new().expect("home");
        let service = service(&home);
        let socket = socket_path(home.path());

        let request = DaemonRequest {
            namespace: Some("forkA".to_string()),
            git_ref: Some("feature-x".to_string()),
            ..DaemonRequest::for_instance("switch", InstanceId(99))
        };
        let err = execute(&service, &request, &socket, started()).unwrap_err();
        let (response, log) =
            with_captured_log(|| failure_response("switch", Some(InstanceId(99)), err));

        assert!(!response.busy);
        assert_eq!(response.error.as_deref(), Some("There is no instance 99."));
        assert!(log.contains("request failed"), "{log}");
        assert!(log.contains("instance=99"), "{log}");
    }

    #[test]
    fn stale_socket_is_removed() {
        let home = TempDir::new().expect("home");
        let socket = home.path().join("stale.sock");
        fs::write(&socket, "").expect("write");
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_round_trip_status_then_stop() {
        if !have_git() {
            eprintln!("skipping: git not found in PATH");
            return;
        }
        let home = TempDir::new().expect("home");
        let service = Arc::new(service(&home));
        let home_path = home.path().to_path_buf();

        let server = tokio::spawn(run(home_path.clone(), service));

        let client_home = home_path.clone();
        let status = tokio::task::spawn_blocking(move || crate::protocol::request_status(&client_home))
            .await
            .expect("join")
            .expect("status");
        assert_eq!(status["running"], json!(true));

        let client_home = home_path.clone();
        tokio::task::spawn_blocking(move || crate::protocol::request_stop(&client_home))
            .await
            .expect("join")
            .expect("stop");

        server.await.expect("join server").expect("server result");
        assert!(!socket_path(&home_path).exists());
    }
}
