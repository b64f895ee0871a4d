//! Best-effort remote monitor: a single-flight latest-version check and
//! error/panic/event reporting against a configured host. Everything here
//! degrades silently; the monitor must never take the assistant down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use quill_common::Version;

use crate::error::QuillErr;
use crate::error::Result;

const HTTP_TIMEOUT: Duration = Duration::from_secs(4);
const BUILD_TOKEN_HEADER: &str = "Build-Token";

#[derive(Debug, Clone, Copy)]
struct Enabled {
    panic: bool,
    error: bool,
    event: bool,
}

/// Remote monitor handle. Cheap to clone via `Arc`; the version cache is
/// sticky for the life of the process (first completed fetch wins, success
/// or failure).
pub struct Monitor {
    host: String,
    current_version: Version,
    stable_props: BTreeMap<String, String>,
    build_token: Option<String>,
    http: OnceCell<reqwest::Client>,
    http_override: Option<reqwest::Client>,
    cache: OnceCell<std::result::Result<Version, String>>,
    enabled: Mutex<Enabled>,
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    error: &'a str,
    metadata: Option<&'a BTreeMap<String, String>>,
    host: BTreeMap<String, String>,
    props: Option<&'a BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct PanicReport<'a> {
    #[serde(flatten)]
    base: ErrorReport<'a>,
    panic: &'a str,
    stack: &'a str,
}

impl Monitor {
    pub fn builder(host: &str, current_version: Version) -> MonitorBuilder {
        MonitorBuilder {
            host: host.trim_end_matches('/').to_string(),
            current_version,
            stable_props: BTreeMap::new(),
            build_token: None,
            http_client: None,
        }
    }

    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    /// Selectively disables reporting kinds. Disabled kinds succeed
    /// silently.
    pub fn set_reporting_enabled(&self, panic: bool, error: bool, event: bool) {
        #[allow(clippy::unwrap_used)] // poisoned mutex should fail the program
        let mut enabled = self.enabled.lock().unwrap();
        *enabled = Enabled {
            panic,
            error,
            event,
        };
    }

    /// Returns the latest released version, fetching it at most once per
    /// process. Concurrent callers share one in-flight request; afterwards
    /// the first outcome (success or failure) is served from cache forever.
    pub async fn latest_version_sync(&self) -> Result<Version> {
        let cached = self
            .cache
            .get_or_init(|| async { self.fetch_latest_version().await })
            .await;
        match cached {
            Ok(version) => Ok(version.clone()),
            Err(message) => Err(QuillErr::VersionCheck(message.clone())),
        }
    }

    /// Non-blocking cache read; never initiates a fetch.
    pub fn latest_version_async(&self) -> Result<Version> {
        match self.cache.get() {
            Some(Ok(version)) => Ok(version.clone()),
            Some(Err(message)) => Err(QuillErr::VersionCheck(message.clone())),
            None => Err(QuillErr::NotCached),
        }
    }

    /// Returns the latest version when the cache holds one newer than the
    /// running build. Never fetches.
    pub fn update_available(&self) -> Option<Version> {
        match self.latest_version_async() {
            Ok(latest) if latest.cmp_precedence(&self.current_version).is_gt() => Some(latest),
            _ => None,
        }
    }

    /// Fire-and-forget warm-up of the version cache.
    pub fn fetch_latest_version_from_host(self: Arc<Self>) {
        tokio::spawn(async move {
            if let Err(err) = self.latest_version_sync().await {
                debug!("background version fetch failed: {err}");
            }
        });
    }

    async fn fetch_latest_version(&self) -> std::result::Result<Version, String> {
        #[derive(serde::Deserialize)]
        struct VersionBody {
            version: String,
        }

        let url = format!("{}/version", self.host);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("unexpected status {}", response.status()));
        }
        let body: VersionBody = response.json().await.map_err(|e| e.to_string())?;
        Version::parse_lenient(&body.version).map_err(|e| e.to_string())
    }

    /// POSTs an error report. Transport and non-2xx failures are returned
    /// to the caller; a disabled kind succeeds without sending anything.
    pub async fn report_error(
        &self,
        error: &str,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        if !self.kind_enabled(|e| e.error) {
            return Ok(());
        }
        let body = ErrorReport {
            error,
            metadata,
            host: host_properties(),
            props: self.props(),
        };
        self.post_json(&format!("{}/error", self.host), &body).await
    }

    /// POSTs a panic report: the error body plus the panic value and stack.
    /// The monitor is the only component allowed to transmit stacks.
    pub async fn report_panic(
        &self,
        panic: &str,
        stack: &str,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        if !self.kind_enabled(|e| e.panic) {
            return Ok(());
        }
        let body = PanicReport {
            base: ErrorReport {
                error: panic,
                metadata,
                host: host_properties(),
                props: self.props(),
            },
            panic,
            stack,
        };
        self.post_json(&format!("{}/panic", self.host), &body).await
    }

    /// Issues a best-effort GET with `ts`, `e`, the metadata pairs, and the
    /// stable props as query parameters. Failures are logged, never
    /// returned. Keys with an empty name are dropped.
    pub fn report_event_async(&self, event: &str, metadata: &BTreeMap<String, String>) {
        if !self.kind_enabled(|e| e.event) {
            return;
        }
        let ts = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut query: Vec<(String, String)> = vec![
            ("ts".to_string(), ts.to_string()),
            ("e".to_string(), event.to_string()),
        ];
        for (k, v) in metadata.iter().chain(self.stable_props.iter()) {
            if k.is_empty() {
                continue;
            }
            query.push((k.clone(), v.clone()));
        }
        let request = self
            .request(reqwest::Method::GET, &format!("{}/event", self.host))
            .query(&query);
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!("event report rejected: {}", response.status());
                }
                Ok(_) => {}
                Err(err) => debug!("event report failed: {err}"),
            }
        });
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(QuillErr::UnexpectedStatus(status, text));
        }
        Ok(())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client().request(method, url);
        if let Some(token) = &self.build_token {
            builder = builder.header(BUILD_TOKEN_HEADER, token);
        }
        builder
    }

    fn client(&self) -> &reqwest::Client {
        if let Some(client) = &self.http_override {
            return client;
        }
        if let Some(client) = self.http.get() {
            return client;
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        let _ = self.http.set(client);
        #[allow(clippy::unwrap_used)] // just set above; set never removes
        self.http.get().unwrap()
    }

    fn props(&self) -> Option<&BTreeMap<String, String>> {
        if self.stable_props.is_empty() {
            None
        } else {
            Some(&self.stable_props)
        }
    }

    fn kind_enabled(&self, select: impl Fn(&Enabled) -> bool) -> bool {
        #[allow(clippy::unwrap_used)] // poisoned mutex should fail the program
        let enabled = self.enabled.lock().unwrap();
        select(&enabled)
    }
}

pub struct MonitorBuilder {
    host: String,
    current_version: Version,
    stable_props: BTreeMap<String, String>,
    build_token: Option<String>,
    http_client: Option<reqwest::Client>,
}

impl MonitorBuilder {
    /// Stable key/value pairs attached to every report, e.g. a release
    /// channel. Keys must not identify the user.
    pub fn stable_props(mut self, props: BTreeMap<String, String>) -> Self {
        self.stable_props = props;
        self
    }

    pub fn build_token(mut self, token: &str) -> Self {
        self.build_token = Some(token.to_string());
        self
    }

    /// Replaces the lazily-created default client (4-second timeout).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Arc<Monitor> {
        Arc::new(Monitor {
            host: self.host,
            current_version: self.current_version,
            stable_props: self.stable_props,
            build_token: self.build_token,
            http: OnceCell::new(),
            http_override: self.http_client,
            cache: OnceCell::new(),
            enabled: Mutex::new(Enabled {
                panic: true,
                error: true,
                event: true,
            }),
        })
    }
}

/// Anonymous host facts: OS family, architecture, CPU count, timezone, and
/// a container heuristic. Never user names, paths, or network identifiers.
pub fn host_properties() -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    props.insert("os".to_string(), os_info::get().os_type().to_string());
    props.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    props.insert(
        "cpus".to_string(),
        std::thread::available_parallelism()
            .map(|n| n.get().to_string())
            .unwrap_or_else(|_| "0".to_string()),
    );
    props.insert("tz".to_string(), timezone_label());
    props.insert("container".to_string(), in_container().to_string());
    props
}

fn timezone_label() -> String {
    match time::UtcOffset::current_local_offset() {
        Ok(offset) if offset.is_utc() => "UTC".to_string(),
        Ok(offset) => {
            let (h, m, _) = offset.as_hms();
            format!("{:+03}:{:02}", h, m.abs())
        }
        Err(_) => "UTC".to_string(),
    }
}

/// Container heuristic: well-known marker files, then cgroup names.
fn in_container() -> bool {
    if std::path::Path::new("/.dockerenv").exists()
        || std::path::Path::new("/run/.containerenv").exists()
    {
        return true;
    }
    match std::fs::read_to_string("/proc/1/cgroup") {
        Ok(cgroups) => ["docker", "kubepods", "containerd", "lxc"]
            .iter()
            .any(|marker| cgroups.contains(marker)),
        Err(_) => false,
    }
}
