use std::path::Path;

use anyhow::{Context, Result};
use event_api::{Envelope, Kind};
use serde_json::json;
use tokio::{io::BufReader, net::UnixStream};
use tracing::info;
use uuid::Uuid;

use crate::{
    ipc::{read_envelope, write_envelope},
    session::UNSUBSCRIBED_TOPIC,
};

/// Subscribe to `name`/`arg` on a running daemon and print every event
/// payload as one JSON line until interrupted.
pub async fn watch(socket: &Path, name: &str, arg: Option<String>) -> Result<()> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("connecting to {}", socket.display()))?;
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let req = Envelope::request(
        Uuid::new_v4().to_string(),
        "event.subscribe",
        json!({"id": Uuid::new_v4().to_string(), "name": name, "arg": arg}),
    );
    write_envelope(&mut write, &req).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            env = read_envelope(&mut reader) => {
                let Some(env) = env? else {
                    info!("daemon closed the connection");
                    break;
                };
                match env.kind {
                    Kind::Response => {
                        if let Some(err) = env.error {
                            anyhow::bail!(err.message);
                        }
                    }
                    Kind::Event if env.topic.as_deref() == Some(UNSUBSCRIBED_TOPIC) => {
                        info!("subscription ended by the event source");
                        break;
                    }
                    Kind::Event => {
                        if let Some(payload) = env.payload {
                            println!("{payload}");
                        }
                    }
                    Kind::Request => {}
                }
            }
        }
    }
    Ok(())
}
