//! HTTP transport to one backend.
//!
//! All control traffic is GET `/service?method=...`; once a session is
//! established the session id is appended to every request.  Streams use
//! a separate agent with no global timeout, since a live stream is
//! supposed to block for as long as playback runs.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use ureq::Agent;

use nextpvr_protocol::{methods, response, types};

use crate::error::{BridgeError, TransportError};
use crate::settings::InstanceSettings;

/// An open byte stream from the backend.
pub struct StreamHandle {
    pub reader: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
}

pub struct Transport {
    base_url: String,
    rpc: Agent,
    ping: Agent,
    stream: Agent,
    sid: Mutex<Option<String>>,
}

impl Transport {
    pub fn new(settings: &InstanceSettings) -> Transport {
        let rpc = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(settings.rpc_timeout_secs)))
            .http_status_as_error(false)
            .build()
            .new_agent();
        let ping = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(2)))
            .http_status_as_error(false)
            .build()
            .new_agent();
        let stream = Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(settings.connect_timeout_secs)))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Transport {
            base_url: settings.base_url(),
            rpc,
            ping,
            stream,
            sid: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn sid(&self) -> String {
        self.sid.lock().clone().unwrap_or_default()
    }

    pub fn set_sid(&self, sid: &str) {
        *self.sid.lock() = Some(sid.to_string());
    }

    pub fn clear_sid(&self) {
        *self.sid.lock() = None;
    }

    pub fn is_active_sid(&self) -> bool {
        self.sid.lock().is_some()
    }

    fn service_url(&self, request: &str) -> String {
        let mut url = format!("{}/service?method={}", self.base_url, request);
        if let Some(sid) = self.sid.lock().as_deref() {
            url.push_str("&sid=");
            url.push_str(sid);
        }
        url
    }

    fn fetch(&self, agent: &Agent, url: &str) -> Result<String, TransportError> {
        log::debug!("GET {}", url);
        let mut response = agent.get(url).call().map_err(|err| {
            log::warn!("request failed: {} ({})", url, err);
            TransportError::Request {
                url: url.to_string(),
                source: Box::new(err),
            }
        })?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::Status {
                status,
                url: url.to_string(),
            });
        }
        response
            .body_mut()
            .read_to_string()
            .map_err(|err| TransportError::Request {
                url: url.to_string(),
                source: Box::new(err),
            })
    }

    /// Issues a method request and decodes the typed body.
    pub fn call<T: DeserializeOwned>(&self, request: &str) -> Result<T, BridgeError> {
        let body = self.fetch(&self.rpc, &self.service_url(request))?;
        Ok(response::decode(&body)?)
    }

    /// Issues a method request where only the envelope status matters.
    pub fn action(&self, request: &str) -> Result<(), BridgeError> {
        let body = self.fetch(&self.rpc, &self.service_url(request))?;
        Ok(response::envelope_ok(&body)?)
    }

    /// Decodes a `<last_update>` timestamp reply.
    pub fn last_update(&self, request: &str) -> Result<i64, BridgeError> {
        let body: response::LastUpdate = self.call(request)?;
        Ok(body.last_update)
    }

    /// Issues a method request and returns the raw body, unvalidated.
    /// The channel cache stores this text verbatim.
    pub fn raw_service(&self, request: &str) -> Result<String, BridgeError> {
        Ok(self.fetch(&self.rpc, &self.service_url(request))?)
    }

    /// Fetches a plain path relative to the backend root.
    pub fn fetch_path(&self, path: &str) -> Result<String, BridgeError> {
        Ok(self.fetch(&self.rpc, &format!("{}{}", self.base_url, path))?)
    }

    /// Downloads a method response body into `target`, returning the
    /// byte count.  An existing target is offered back to the backend
    /// via `If-Modified-Since`; a 304 answer keeps it and reports zero
    /// bytes.  The body lands in a sibling `.part` file first so a
    /// failed download never clobbers the old copy.
    pub fn file_copy(&self, request: &str, target: &Path) -> Result<u64, BridgeError> {
        let url = self.service_url(request);
        log::debug!("GET {} -> {}", url, target.display());
        let get = self.rpc.get(&url);
        let get = match http_date_of(target) {
            Some(since) => get.header("If-Modified-Since", &since),
            None => get,
        };
        let response = get.call().map_err(|err| TransportError::Request {
            url: url.clone(),
            source: Box::new(err),
        })?;
        let status = response.status().as_u16();
        if status == 304 {
            log::debug!("{} not modified", target.display());
            return Ok(0);
        }
        if status != 200 {
            return Err(TransportError::Status { status, url }.into());
        }
        let part = target.with_extension("part");
        let mut reader = response.into_body().into_reader();
        let mut file = File::create(&part)?;
        let copied = match std::io::copy(&mut reader, &mut file) {
            Ok(copied) => copied,
            Err(err) => {
                drop(file);
                let _ = std::fs::remove_file(&part);
                return Err(err.into());
            }
        };
        drop(file);
        std::fs::rename(&part, target)?;
        Ok(copied)
    }

    /// Opens a long-lived byte stream, optionally starting mid-file.
    pub fn open_stream(&self, url: &str, start: Option<u64>) -> Result<StreamHandle, BridgeError> {
        log::debug!("open stream {} start={:?}", url, start);
        let request = self.stream.get(url);
        let request = match start {
            Some(offset) if offset > 0 => request.header("Range", &format!("bytes={offset}-")),
            _ => request,
        };
        let response = request.call().map_err(|err| TransportError::Request {
            url: url.to_string(),
            source: Box::new(err),
        })?;
        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Err(TransportError::Status {
                status,
                url: url.to_string(),
            }
            .into());
        }
        let content_length = response
            .headers()
            .get("Content-Length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        Ok(StreamHandle {
            reader: Box::new(response.into_body().into_reader()),
            content_length,
        })
    }

    /// Cheap reachability probe with a tight timeout.  Any well-formed
    /// HTTP answer counts; an unreachable host does not.
    pub fn ping(&self) -> bool {
        let url = self.service_url(methods::RECORDING_LAST_UPDATED);
        match self.ping.get(&url).call() {
            Ok(response) => response.status().as_u16() == 200,
            Err(_) => false,
        }
    }

    /// Keeps the session alive while a stream is playing.
    pub fn renew_sid(&self) -> Result<(), BridgeError> {
        self.action(methods::SESSION_RENEW)
    }

    /// Fetches the public stream override table.
    pub fn public_streams(&self) -> Result<String, BridgeError> {
        self.fetch_path(types::PUBLIC_STREAMS_PATH)
    }
}

/// The target's mtime as an HTTP date, when it exists.
fn http_date_of(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let when: chrono::DateTime<chrono::Utc> = modified.into();
    Some(when.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}
