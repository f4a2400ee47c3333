use std::{future::Future, path::Path, sync::Arc};

use anyhow::{Context, Result};
use event_api::{Envelope, Event, Kind};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    io::{BufReader, BufWriter},
    net::{UnixListener, UnixStream},
    sync::mpsc::{unbounded_channel, UnboundedSender},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    broker::{App, AppHandle, Broker, SubscriptionIdent},
    ipc::{read_envelope, write_envelope},
};

pub const BROKER_ERROR: i32 = -32000;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

/// Topic of the notice sent when an event source ends a subscription on its own.
pub const UNSUBSCRIBED_TOPIC: &str = "event.unsubscribed";

/// One connected client.
pub struct Session {
    id: Uuid,
    tx: UnboundedSender<Envelope>,
}

impl Session {
    /// Broker ident for the client's subscription `client_id`, unique across sessions.
    fn ident(&self, client_id: &str) -> SubscriptionIdent {
        SubscriptionIdent::new(format!("{}:{}", self.id, client_id))
    }

    fn client_id<'a>(&self, ident: &'a SubscriptionIdent) -> &'a str {
        ident
            .as_str()
            .split_once(':')
            .map_or(ident.as_str(), |(_, id)| id)
    }
}

impl App for Session {
    fn send_event(&self, name: &str, event: &Event) {
        match serde_json::to_value(event) {
            Ok(payload) => {
                let _ = self.tx.send(Envelope::event(name, payload));
            }
            Err(err) => warn!(session = %self.id, error = %err, "failed to serialize event"),
        }
    }

    fn subscription_ended(&self, ident: &SubscriptionIdent) {
        let notice = Envelope::event(UNSUBSCRIBED_TOPIC, json!({"id": self.client_id(ident)}));
        let _ = self.tx.send(notice);
    }
}

#[derive(Deserialize)]
struct SubscribeParams {
    id: String,
    name: String,
    #[serde(default)]
    arg: Option<String>,
}

#[derive(Deserialize)]
struct UnsubscribeParams {
    id: String,
}

/// Bind the daemon socket, replacing a stale one left by a previous run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))
}

/// Accept clients until `shutdown` resolves.
pub async fn serve<F>(listener: UnixListener, broker: Arc<Broker>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let broker = broker.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, broker).await {
                            debug!(error = %err, "client connection ended with an error");
                        }
                    });
                }
                Err(err) => error!(error = %err, "failed to accept client connection"),
            }
        }
    }
    Ok(())
}

async fn handle_connection(stream: UnixStream, broker: Arc<Broker>) -> Result<()> {
    let (read, write) = stream.into_split();
    let (tx, mut rx) = unbounded_channel::<Envelope>();
    let session = Arc::new(Session {
        id: Uuid::new_v4(),
        tx: tx.clone(),
    });
    let app: AppHandle = session.clone();
    debug!(session = %session.id, "client connected");

    let writer = tokio::spawn(async move {
        let mut w = BufWriter::new(write);
        while let Some(env) = rx.recv().await {
            if let Err(err) = write_envelope(&mut w, &env).await {
                debug!(error = %err, "failed to write to client");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read);
    let outcome = loop {
        match read_envelope(&mut reader).await {
            Ok(Some(env)) if env.kind == Kind::Request => {
                let resp = handle_request(&broker, &session, &app, env);
                let _ = tx.send(resp);
            }
            Ok(Some(_)) => {}
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    broker.unsubscribe_app(&app);
    debug!(session = %session.id, "client disconnected");
    writer.abort();
    outcome
}

fn handle_request(broker: &Broker, session: &Session, app: &AppHandle, env: Envelope) -> Envelope {
    let id = env.id;
    let params = env.params.unwrap_or(Value::Null);
    match env.method.as_deref() {
        Some("event.subscribe") => match serde_json::from_value::<SubscribeParams>(params) {
            Ok(p) => match broker.subscribe(app.clone(), session.ident(&p.id), &p.name, p.arg) {
                Ok(()) => Envelope::ok(id),
                Err(err) => Envelope::error(id, BROKER_ERROR, err.to_string()),
            },
            Err(err) => Envelope::error(id, INVALID_PARAMS, err.to_string()),
        },
        Some("event.unsubscribe") => match serde_json::from_value::<UnsubscribeParams>(params) {
            Ok(p) => match broker.unsubscribe(&session.ident(&p.id)) {
                Ok(()) => Envelope::ok(id),
                Err(err) => Envelope::error(id, BROKER_ERROR, err.to_string()),
            },
            Err(err) => Envelope::error(id, INVALID_PARAMS, err.to_string()),
        },
        Some("event.sources") => Envelope::response(id, json!(broker.sources())),
        Some(method) => Envelope::error(id, METHOD_NOT_FOUND, format!("unknown method {method}")),
        None => Envelope::error(id, INVALID_PARAMS, "request without method"),
    }
}
