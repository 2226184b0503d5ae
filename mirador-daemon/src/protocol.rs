use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mirador_core::{InstanceId, PullRequestRef};
use mirador_sync::{NewsPost, SwitchRequest};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request. Which fields matter depends on `cmd`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_master: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRef>,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }

    pub fn for_instance(cmd: impl Into<String>, instance: InstanceId) -> Self {
        Self {
            instance: Some(instance),
            ..Self::new(cmd)
        }
    }

    fn with_switch(self, request: &SwitchRequest) -> Self {
        Self {
            namespace: Some(request.namespace.clone()),
            git_ref: Some(request.git_ref.clone()),
            merge_master: Some(request.merge_master),
            ..self
        }
    }

    pub fn instance(&self) -> Result<InstanceId, DaemonError> {
        self.instance.ok_or_else(|| missing("instance"))
    }

    /// The switch target carried by `switch` and `switch-any`.
    pub fn switch_request(&self) -> Result<SwitchRequest, DaemonError> {
        Ok(SwitchRequest::new(
            self.namespace.clone().ok_or_else(|| missing("namespace"))?,
            self.git_ref.clone().ok_or_else(|| missing("git_ref"))?,
            self.merge_master.unwrap_or(false),
        ))
    }

    pub fn news_post(&self) -> Result<NewsPost, DaemonError> {
        Ok(NewsPost::new(
            self.content.clone().ok_or_else(|| missing("content"))?,
            self.year.clone().ok_or_else(|| missing("year"))?,
            self.filename.clone().ok_or_else(|| missing("filename"))?,
        ))
    }
}

fn missing(field: &str) -> DaemonError {
    DaemonError::Protocol(format!("missing field '{field}'"))
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the request was refused because the instance is locked.
    #[serde(default)]
    pub busy: bool,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            busy: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            busy: false,
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self {
            busy: true,
            ..Self::error(message)
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// `status`, retried briefly so it works right after `daemon start`.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    call(home, DaemonRequest::new("stop")).map(|_| ())
}

pub fn request_switch(
    home: &Path,
    instance: InstanceId,
    request: &SwitchRequest,
) -> Result<Value, DaemonError> {
    call(home, DaemonRequest::for_instance("switch", instance).with_switch(request))
}

pub fn request_switch_any(home: &Path, request: &SwitchRequest) -> Result<Value, DaemonError> {
    call(home, DaemonRequest::new("switch-any").with_switch(request))
}

pub fn request_refresh(home: &Path, instance: InstanceId) -> Result<Value, DaemonError> {
    call(home, DaemonRequest::for_instance("refresh", instance))
}

pub fn request_news(home: &Path, instance: InstanceId, post: &NewsPost) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            year: Some(post.year.clone()),
            filename: Some(post.filename.clone()),
            content: Some(post.content.clone()),
            ..DaemonRequest::for_instance("news", instance)
        },
    )
}

pub fn request_flags(
    home: &Path,
    instance: InstanceId,
    redate: Option<bool>,
    master: Option<bool>,
) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            redate,
            master,
            ..DaemonRequest::for_instance("flags", instance)
        },
    )
}

pub fn request_link(
    home: &Path,
    instance: InstanceId,
    pull_request: Option<PullRequestRef>,
) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            pull_request,
            ..DaemonRequest::for_instance("link", instance)
        },
    )
}

pub fn request_release(home: &Path, instance: InstanceId) -> Result<Value, DaemonError> {
    call(home, DaemonRequest::for_instance("release", instance))
}

/// State of one instance, or the whole fleet when `instance` is `None`.
pub fn request_state(home: &Path, instance: Option<InstanceId>) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            instance,
            ..DaemonRequest::new("state")
        },
    )
}

fn call(home: &Path, request: DaemonRequest) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &request)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    let message = || {
        response
            .error
            .clone()
            .unwrap_or_else(|| "unknown daemon error".to_string())
    };
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else if response.busy {
        Err(DaemonError::Busy(message()))
    } else {
        Err(DaemonError::Protocol(message()))
    }
}
