pub mod parse;

use std::{
    io::{self, BufRead, BufReader},
    net::Shutdown,
    os::unix::net::UnixStream,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use event_api::{Emitter, EventSource, SourceFactory, SourceInit};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

pub use parse::parse_line;

/// Name the devd reader is registered under.
pub const SOURCE_NAME: &str = "system.device";
pub const DEFAULT_PIPE: &str = "/var/run/devd.pipe";
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DevdSettings {
    /// Path of the devd socket.
    pub pipe: PathBuf,
    /// Delay between reconnection attempts.
    pub retry_interval: Duration,
}

impl Default for DevdSettings {
    fn default() -> Self {
        Self {
            pipe: PathBuf::from(DEFAULT_PIPE),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Builds one [`DevdEventSource`] per subscription key.
#[derive(Debug, Clone, Default)]
pub struct DevdFactory {
    settings: DevdSettings,
}

impl DevdFactory {
    pub fn new(settings: DevdSettings) -> Self {
        Self { settings }
    }
}

impl SourceFactory for DevdFactory {
    fn create(&self, init: SourceInit) -> anyhow::Result<Arc<dyn EventSource>> {
        debug!(name = %init.name, "starting devd reader");
        let source: Arc<dyn EventSource> =
            Arc::new(DevdEventSource::new(self.settings.clone(), init.emitter));
        Ok(source)
    }
}

#[derive(Default)]
struct Connection {
    cancelled: bool,
    stream: Option<UnixStream>,
}

pub struct DevdEventSource {
    settings: DevdSettings,
    emitter: Emitter,
    conn: Mutex<Connection>,
    wake: Condvar,
}

impl DevdEventSource {
    pub fn new(settings: DevdSettings, emitter: Emitter) -> Self {
        Self {
            settings,
            emitter,
            conn: Mutex::new(Connection::default()),
            wake: Condvar::new(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.conn.lock().cancelled
    }

    /// Connect and publish a clone of the socket so `cancel` can shut it down.
    fn connect(&self) -> io::Result<UnixStream> {
        let stream = UnixStream::connect(&self.settings.pipe)?;
        let handle = stream.try_clone()?;
        let mut conn = self.conn.lock();
        if conn.cancelled {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
        }
        conn.stream = Some(handle);
        Ok(stream)
    }

    /// Read records until devd closes the connection.
    fn read_events(&self, stream: UnixStream) -> io::Result<()> {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            match parse_line(&line) {
                Some(event) => self.emitter.emit(event),
                None => trace!(line = %line.trim_end(), "dropping devd record"),
            }
        }
    }

    /// Sleep for the retry interval unless cancelled in the meantime.
    fn pause(&self) {
        let mut conn = self.conn.lock();
        if !conn.cancelled {
            self.wake.wait_for(&mut conn, self.settings.retry_interval);
        }
    }
}

impl EventSource for DevdEventSource {
    fn process(&self) -> anyhow::Result<()> {
        let pipe = self.settings.pipe.display();
        while !self.is_cancelled() {
            match self.connect() {
                Ok(stream) => {
                    info!(%pipe, "connected to devd");
                    let outcome = self.read_events(stream);
                    self.conn.lock().stream = None;
                    if self.is_cancelled() {
                        break;
                    }
                    match outcome {
                        Ok(()) => debug!(%pipe, "devd closed the connection, reconnecting"),
                        Err(err) => debug!(%pipe, error = %err, "lost devd connection, reconnecting"),
                    }
                }
                Err(err) => debug!(
                    %pipe,
                    error = %err,
                    "devd pipe not available, retrying in {:?}",
                    self.settings.retry_interval
                ),
            }
            self.pause();
        }
        debug!(%pipe, "devd reader stopped");
        Ok(())
    }

    fn cancel(&self) {
        let mut conn = self.conn.lock();
        conn.cancelled = true;
        if let Some(stream) = conn.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.wake.notify_all();
    }
}
