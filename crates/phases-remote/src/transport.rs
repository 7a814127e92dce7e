use futures_util::{SinkExt, StreamExt};
use phases_core::protocol::{encode, Outbound};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::session::{Intent, Session};

enum Exit {
    Closed,
    Quit,
}

/// Drives the socket for `session` until the operator quits.
///
/// Connects once on start. After the controller goes away the loop waits for
/// an explicit `Connect` intent; there is no automatic retry.
pub async fn run(
    url: &Url,
    session: &mut Session,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    intents: &mut mpsc::Receiver<Intent>,
) {
    let mut connect_requested = true;
    loop {
        if connect_requested && session.begin_connect().is_some() {
            if let Exit::Quit = connect_once(url, session, outbound_rx, intents).await {
                return;
            }
        }
        connect_requested = false;

        match intents.recv().await {
            Some(Intent::Connect) => connect_requested = true,
            Some(Intent::Show) => session.show(),
            Some(Intent::Quit) | None => return,
            Some(intent) => session.submit(intent),
        }
    }
}

async fn connect_once(
    url: &Url,
    session: &mut Session,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    intents: &mut mpsc::Receiver<Intent>,
) -> Exit {
    let (mut ws, _) = match connect_async(url.as_str()).await {
        Ok(value) => value,
        Err(err) => {
            warn!("controller_connect_error: {err}");
            session.on_close();
            return Exit::Closed;
        }
    };

    // Anything queued against a previous socket is stale.
    while outbound_rx.try_recv().is_ok() {}
    session.on_open();

    let exit = loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        info!(event = "controller_closed", frame = ?frame);
                        break Exit::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("controller_socket_error: {err}");
                        break Exit::Closed;
                    }
                    None => break Exit::Closed,
                }
            }
            Some(out) = outbound_rx.recv() => {
                let text = match encode(&out) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(event = "outbound_encode_error", kind = out.kind(), error = %err);
                        continue;
                    }
                };
                if ws.send(Message::Text(text)).await.is_err() {
                    break Exit::Closed;
                }
            }
            intent = intents.recv() => {
                match intent {
                    Some(Intent::Quit) | None => break Exit::Quit,
                    Some(Intent::Connect) => {
                        debug!(event = "connect_ignored", state = %session.state());
                    }
                    Some(Intent::Show) => session.show(),
                    Some(intent) => session.submit(intent),
                }
            }
        }
    };
    let _ = ws.close(None).await;
    session.on_close();
    exit
}
